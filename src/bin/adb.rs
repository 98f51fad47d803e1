//! Thin CLI over the `adb` library: one subcommand per device operation.

use adb::config::Config;
use adb::device::Device;
use adb::usb::usb_devices;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "adb", about = "Host-side Android Debug Bridge client")]
struct Cli {
    /// Serial of the USB device to target, if more than one is attached.
    #[arg(long, short = 's', global = true)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a shell command on the device.
    Shell {
        cmd: String,
        /// Print output as it arrives, in addition to the final print.
        #[arg(long, short = 'e')]
        echo: bool,
    },
    /// Push a local file to the device.
    Push { local: PathBuf, remote: String },
    /// Pull a file from the device.
    Pull { remote: String, local: PathBuf },
    /// List a remote directory.
    List { path: String },
    /// Stat a remote path.
    Stat { path: String },
    /// Install an APK.
    Install { apk: PathBuf },
    /// Uninstall a package by name.
    Uninstall { package: String },
    /// Reboot the device.
    Reboot,
    /// List attached USB devices exposing the ADB interface.
    Devices,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if let Cmd::Devices = cli.command {
        return list_devices();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn list_devices() -> ExitCode {
    let devices = match usb_devices() {
        Ok(d) => d,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    for device in devices.iter() {
        match device {
            Ok(device) => println!("{}\tdevice", device.serial()),
            Err(err) => log::warn!("skipping unreadable USB device: {err}"),
        }
    }
    ExitCode::SUCCESS
}

fn run(cli: &Cli) -> adb::Result<()> {
    let config = Config::from_env();
    let mut device = Device::connect_usb(cli.serial.as_deref(), config)?;
    log::info!("connected to {}", device.identity().unwrap_or("unknown"));

    match &cli.command {
        Cmd::Shell { cmd, echo } => {
            let output = device.shell(cmd, *echo)?;
            if !echo {
                print!("{}", String::from_utf8_lossy(&output));
            }
        }
        Cmd::Push { local, remote } => device.push(local, remote)?,
        Cmd::Pull { remote, local } => device.pull(remote, local)?,
        Cmd::List { path } => {
            for entry in device.list(path)? {
                println!("{:o}\t{}\t{}", entry.mode, entry.size, entry.name);
            }
        }
        Cmd::Stat { path } => {
            let stat = device.stat(path)?;
            println!("mode={:o} size={} mtime={}", stat.mode, stat.size, stat.mtime);
        }
        Cmd::Install { apk } => {
            let output = device.install(apk)?;
            print!("{output}");
        }
        Cmd::Uninstall { package } => {
            let output = device.uninstall(package)?;
            print!("{output}");
        }
        Cmd::Reboot => device.reboot()?,
        Cmd::Devices => unreachable!("handled before connecting"),
    }
    Ok(())
}
