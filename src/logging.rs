use flexi_logger::{opt_format, Cleanup, Criterion, FileSpec, Logger, Naming};
use std::path::Path;

/// Initialize logging for the process. The level comes from `RUST_LOG` when
/// set, otherwise from `default_level`. When `log_dir` is given, logs go to
/// rotating files there instead of the terminal.
pub fn setup_logging(
    default_level: &str,
    log_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let logger = Logger::try_with_env_or_str(default_level)?;

    match log_dir {
        Some(dir) => {
            logger
                .log_to_file(FileSpec::default().directory(dir))
                .format(opt_format)
                .rotate(
                    Criterion::Size(10 * 1024 * 1024),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(3),
                )
                .start()?;
        }
        None => {
            logger.format(flexi_logger::colored_default_format).start()?;
        }
    }

    Ok(())
}
