#[cfg(feature = "profiling")]
use std::{
    fs::File,
    io::Write,
    sync::{Mutex, Once},
    time::Instant,
};

#[cfg(feature = "profiling")]
use lazy_static::lazy_static;

#[cfg(feature = "profiling")]
lazy_static! {
    static ref PROFILING_FILE: Mutex<Option<File>> = {
        let file = File::create("durations.csv").and_then(|mut file| {
            writeln!(&mut file, "layer,operation,seconds")?;
            Ok(file)
        });
        if let Err(e) = &file {
            warn!("[profiling] Could not create durations.csv: {}", e);
        }
        Mutex::new(file.ok())
    };
}

#[cfg(feature = "profiling")]
static WRITE_FAILED: Once = Once::new();

/// Runs `func` and appends its duration to `durations.csv`.
#[cfg(feature = "profiling")]
pub fn evaluate_fn<T>(layer: &str, operation: &str, func: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let res = func();
    let seconds = start.elapsed().as_secs_f64();

    if let Ok(mut lock) = PROFILING_FILE.lock() {
        if let Some(file) = lock.as_mut() {
            if let Err(e) = writeln!(file, "{},{},{}", layer, operation, seconds) {
                WRITE_FAILED.call_once(|| {
                    warn!("[profiling] Could not write to durations.csv: {}", e);
                });
            }
        }
    }

    res
}

#[cfg(feature = "profiling")]
macro_rules! evaluate {
    ($layer:expr, $operation:expr, $func:expr ) => {
        crate::profiling::evaluate_fn($layer, $operation, || $func)
    };
}

#[cfg(not(feature = "profiling"))]
macro_rules! evaluate {
    ($layer:expr, $operation:expr, $func:expr ) => {
        $func
    };
}

pub(crate) use evaluate;
