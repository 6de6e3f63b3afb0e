use std::{fs::OpenOptions, path::PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fat32_fs::{
    Label,
    format::{Fat32, FormatVolumeOptionsBuilder},
    volume::Volume,
};

#[derive(Parser)]
#[command(name = "fat32-fs")]
#[command(about = "Format and inspect FAT32 volumes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format a partition or image file as FAT32
    Format {
        /// Partition or image file
        path: PathBuf,
        /// Volume size in bytes. Defaults to the current length of the file.
        #[arg(short, long)]
        size: Option<u64>,
        /// Volume label (up to 11 characters)
        #[arg(short, long)]
        label: Option<String>,
        /// Bytes per cluster. Selected from the volume size if omitted.
        #[arg(short, long, default_value_t = 0)]
        cluster_size: u32,
        #[arg(long, default_value_t = 512)]
        bytes_per_sector: u16,
        #[arg(long, default_value_t = 63)]
        sectors_per_track: u16,
        #[arg(long, default_value_t = 255)]
        heads: u16,
        /// Hidden sectors preceding the partition. Defaults to the sectors per track.
        #[arg(long)]
        hidden_sectors: Option<u32>,
        /// Zero the whole volume first
        #[arg(long)]
        full: bool,
        /// Do not write a backup boot sector
        #[arg(long)]
        no_backup: bool,
        /// Create (or grow) the image file to `--size`
        #[arg(long, requires = "size")]
        create: bool,
    },
    /// Print the layout of a FAT32 volume and verify its structures
    Inspect {
        /// Partition or image file
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Format {
            path,
            size,
            label,
            cluster_size,
            bytes_per_sector,
            sectors_per_track,
            heads,
            hidden_sectors,
            full,
            no_backup,
            create,
        } => {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(create)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;

            let len = file.metadata()?.len();
            let size = size.unwrap_or(len);
            if create && len < size {
                file.set_len(size)?;
            }

            let mut builder = FormatVolumeOptionsBuilder::default();
            builder
                .dev_size(size)
                .bytes_per_sector(bytes_per_sector)
                .sectors_per_track(sectors_per_track)
                .tracks_per_cylinder(heads)
                .bytes_per_cluster(cluster_size)
                .full_format(full);
            if let Some(label) = label {
                builder.label(Label::new(&label));
            }
            if let Some(hidden_sectors) = hidden_sectors {
                builder.hidden_sectors(hidden_sectors);
            }
            if no_backup {
                builder.backup_boot_sector(0);
            }

            let formatter = Fat32::try_from(builder.build()?)?;
            formatter.write_with_progress(&mut file, |p| {
                log::debug!("{}/{} {}", p.completed, p.total, p.stage);
            })?;
            file.sync_all()?;

            println!(
                "Formatted {} as FAT32: {} clusters of {} bytes, serial {:08X}",
                path.display(),
                formatter.cluster_count(),
                formatter.bytes_per_cluster(),
                formatter.volume_serial()
            );
        }
        Commands::Inspect { path } => {
            let file = OpenOptions::new()
                .read(true)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;

            let volume = Volume::open(&file)?;
            let boot = volume.boot_sector();

            println!("Label:              {}", volume.label());
            println!("Serial:             {:08X}", boot.volume_id());
            println!("Bytes per sector:   {}", boot.bytes_per_sector());
            println!("Bytes per cluster:  {}", boot.bytes_per_cluster());
            println!("Total sectors:      {}", boot.total_sectors());
            println!("Reserved sectors:   {}", boot.reserved_sectors());
            println!("FATs:               {} x {} sectors", boot.number_of_fats(), boot.fat_length());
            println!("Clusters:           {}", volume.cluster_count());
            println!("Root cluster:       {}", boot.root_cluster());
            println!("Backup boot sector: {}", boot.backup_boot_sector());

            volume.verify()?;
            let free = volume.fat(0)?.free_clusters();
            println!("Free clusters:      {free}");
            println!("Volume is consistent.");
        }
    }

    Ok(())
}
