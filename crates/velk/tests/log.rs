//! Log facade: sink capture, runtime level adjustment, and registry
//! diagnostics flowing through the installed sink.

use std::sync::{Arc, Mutex};

use velk::{instance, LogLevel, LogSink};

#[derive(Debug, Default)]
struct CaptureSink {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl LogSink for CaptureSink {
    fn write(&self, level: LogLevel, _file: &str, _line: u32, message: &str) {
        self.records
            .lock()
            .unwrap()
            .push((level, message.to_owned()));
    }
}

velk::interface! {
    pub interface ILoggedThing {
        properties {
            value: i32 = 0;
        }
    }
}

velk::object_class! {
    pub class LoggedThing {
        implements: [ILoggedThing],
    }
}

/// The global logger is process state; one test drives all assertions to
/// keep sink swaps race-free.
#[test]
fn sink_and_level_control() {
    // Touch the runtime first so the logger is installed.
    let _ = instance();

    let sink = Arc::new(CaptureSink::default());
    let previous_level = velk::log::level();
    let previous_sink = velk::log::set_sink(sink.clone());

    // Debug suppressed at the default Info level.
    velk::log::set_level(LogLevel::Info);
    log::debug!("hidden debug line");
    log::warn!("visible warning");
    {
        let records = sink.records.lock().unwrap();
        assert!(records.iter().all(|(_, m)| m != "hidden debug line"));
        assert!(records
            .iter()
            .any(|(level, m)| *level == LogLevel::Warning && m == "visible warning"));
    }

    // Registry churn logs at Debug once the level allows it.
    velk::log::set_level(LogLevel::Debug);
    instance().register_type::<LoggedThing>();
    {
        let records = sink.records.lock().unwrap();
        assert!(records
            .iter()
            .any(|(level, m)| *level == LogLevel::Debug && m.contains("LoggedThing")));
    }

    // Errors always pass.
    velk::log::set_level(LogLevel::Error);
    log::info!("quiet info");
    log::error!("loud failure");
    {
        let records = sink.records.lock().unwrap();
        assert!(records.iter().all(|(_, m)| m != "quiet info"));
        assert!(records.iter().any(|(_, m)| m == "loud failure"));
    }

    velk::log::set_level(previous_level);
    velk::log::set_sink(previous_sink);
}
