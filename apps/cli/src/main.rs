use anyhow::Result;
use clap::{Parser, Subcommand};
use usbprobe_core::{meta, UsbStorage};

#[derive(Parser)]
#[command(name = "usbprobe", about = "Enumerate USB mass-storage devices")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List USB storage devices attached to this host, as JSON
    List {
        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },
    /// Read identity records from .device_meta marker files
    FromMeta {
        /// Volume roots to inspect
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::List { pretty } => {
            let storages = list_usb_storage()?;
            print_storages(&storages, pretty)
        }
        Command::FromMeta { paths } => {
            let storages = meta::read_from_volumes(&paths);
            print_storages(&storages, true)
        }
    }
}

fn print_storages(storages: &[UsbStorage], pretty: bool) -> Result<()> {
    if pretty {
        println!("{}", serde_json::to_string_pretty(storages)?);
    } else {
        println!("{}", serde_json::to_string(storages)?);
    }
    Ok(())
}

fn list_usb_storage() -> Result<Vec<UsbStorage>> {
    #[cfg(target_os = "macos")]
    {
        return usbprobe_host_macos::list_usb_storage();
    }
    #[cfg(target_os = "linux")]
    {
        return usbprobe_host_linux::list_usb_storage();
    }
    #[cfg(windows)]
    {
        return usbprobe_host_windows::list_usb_storage();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", windows)))]
    {
        Err(anyhow::anyhow!("unsupported OS for USB storage enumeration"))
    }
}
