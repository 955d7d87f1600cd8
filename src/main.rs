use retune::app::AppStartupOptions;
use retune::audio::AudioOutput;
use std::path::PathBuf;

#[derive(Debug, Default)]
struct CliArgs {
    dir: Option<PathBuf>,
    reset_clock: bool,
    epoch_ms: Option<i64>,
    null_audio: bool,
    device: Option<String>,
    list_devices: bool,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;

    if args.list_devices {
        for device in AudioOutput::available_devices() {
            println!("{device}");
        }
        return Ok(());
    }

    retune::logging::init()?;
    retune::app::run(AppStartupOptions {
        startup: retune::core::StartupOptions {
            directory: args.dir,
            reset_clock: args.reset_clock,
            epoch_ms: args.epoch_ms,
        },
        null_audio: args.null_audio,
        device: args.device,
    })
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--dir requires a path");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--dir cannot be empty");
                }
                out.dir = Some(PathBuf::from(value));
            }
            "--reset-clock" => out.reset_clock = true,
            "--epoch" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--epoch requires a millisecond timestamp");
                };
                let epoch: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("--epoch expects milliseconds, got {value}"))?;
                out.epoch_ms = Some(epoch);
            }
            "--null-audio" => out.null_audio = true,
            "--device" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--device requires a device name");
                };
                out.device = Some(value.clone());
            }
            "--list-devices" => out.list_devices = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("retune");
    println!("  --dir <path>       Scan this directory for stations");
    println!("  --reset-clock      Restart the broadcast clock from now");
    println!("  --epoch <ms>       Restart the broadcast clock at this Unix time in ms");
    println!("  --null-audio       Run without an audio device");
    println!("  --device <name>    Play through this output device");
    println!("  --list-devices     Print available output devices and exit");
}
