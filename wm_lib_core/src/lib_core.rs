pub use log;
pub use serde;
pub use serde_derive;
pub use serde_json;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Debugging and performance

/// Logs the time between its creation and its drop
pub struct TimerScoped {
    log_message: String,
    creation_time: std::time::Instant,
}

impl Drop for TimerScoped {
    fn drop(&mut self) {
        let duration_since_creation = self.creation_time.elapsed().as_secs_f64();
        log::debug!(
            "{}: {:.3}ms",
            self.log_message,
            duration_since_creation * 1000.0
        );
    }
}

impl TimerScoped {
    pub fn new_scoped(output_text: &str) -> TimerScoped {
        TimerScoped {
            log_message: output_text.to_owned(),
            creation_time: std::time::Instant::now(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Logger

pub fn init_logging(logfile_path: &str, loglevel: log::Level) -> Result<(), String> {
    let logfile = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(logfile_path)
        .map_err(|error| format!("Could not create logfile at '{}' : {}", logfile_path, error))?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}::{}: {}",
                record.target(),
                record.level(),
                message
            ))
        })
        .level(loglevel.to_level_filter())
        .level_for("sdl2", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(logfile)
        .apply()
        .map_err(|error| format!("Could initialize logger: {}", error))?;

    log::info!("Logger initialized");

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Fileloading

pub fn read_file_whole(filepath: &str) -> Result<Vec<u8>, String> {
    std::fs::read(filepath)
        .map_err(|error| format!("Could not read file '{}' : {}", filepath, error))
}

pub fn path_exists(path: &str) -> bool {
    std::path::Path::new(path).exists()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Convenience Serialization / Deserialization

pub fn serialize_to_json<T>(data: &T) -> Result<String, String>
where
    T: serde::Serialize,
{
    serde_json::to_string_pretty(data)
        .map_err(|error| format!("Could not serialize data to json: {}", error))
}

pub fn deserialize_from_json<T>(json: &str) -> Result<T, String>
where
    for<'de> T: serde::Deserialize<'de>,
{
    serde_json::from_str(json).map_err(|error| format!("Could not deserialize json: {}", error))
}

pub fn load_json_file<T>(filepath: &str) -> Result<T, String>
where
    for<'de> T: serde::Deserialize<'de>,
{
    let file_content = read_file_whole(filepath)?;
    serde_json::from_slice(&file_content).map_err(|error| {
        format!(
            "Could not deserialize from json file '{}': {}",
            filepath, error
        )
    })
}

pub fn write_json_file<T>(data: &T, filepath: &str) -> Result<(), String>
where
    T: serde::Serialize,
{
    let output_string = serialize_to_json(data)?;
    std::fs::write(filepath, output_string)
        .map_err(|error| format!("Could not write json file '{}': {}", filepath, error))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Utility

/// Makes a panic info a little easier to read by splitting it into the message and location
pub fn panic_message_split_to_message_and_location<P: std::fmt::Display>(
    panic_info: &P,
) -> (String, String) {
    let panic_info_content = format!("{}", panic_info);

    // Current format: "panicked at <location>:\n<message>"
    if let Some(content) = panic_info_content.strip_prefix("panicked at ") {
        if let Some(split_pos) = content.find(":\n") {
            let (location, message) = content.split_at(split_pos);
            return (message[2..].to_string(), location.to_string());
        }
    }

    // Older format: "panicked at '<message>', <location>"
    let panic_info_content = panic_info_content.replace("panicked at '", "");
    if let Some(split_pos) = panic_info_content.rfind("', ") {
        let (message, location) = panic_info_content.split_at(split_pos);
        let location = location.replace("', ", "");
        (message.to_string(), location)
    } else {
        ("Panicked".to_string(), panic_info_content)
    }
}

/// Logs the panic and aborts so that threads like the audio callback cannot keep running
pub fn panic_set_hook_log_and_abort() {
    std::panic::set_hook(Box::new(|panic_info| {
        let (message, location) = panic_message_split_to_message_and_location(panic_info);
        log::error!("{}\n\nError occured at: {}", message, location);
        std::process::abort();
    }));
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests
