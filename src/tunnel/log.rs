use std::io::Write;

use env_logger;

/// Configures the global logger: stderr by default, the configured log
/// file otherwise. Level comes from the config but RUST_LOG still wins,
/// so a run can be inspected without touching the file.
pub fn setup(filename: &Option<String>, level: &str) {
    let target = match filename {
        Some(logfile) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)
        {
            Ok(file) => env_logger::Target::Pipe(Box::new(file)),
            Err(e) => {
                eprintln!("Could not open log file {}: {}, using stderr", logfile, e);
                env_logger::Target::Stderr
            }
        },
        None => env_logger::Target::Stderr,
    };

    // try_init so tests may call setup more than once
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(target)
        .format_module_path(false)
        .format_timestamp_millis()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} - {}",
                buf.timestamp_millis(),
                record.level(),
                record.args()
            )
        })
        .try_init()
        .unwrap_or_default();
}
