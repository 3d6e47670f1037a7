use libwriteslots::LogAppender;
use serde_json::json;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::io::stderr;
use std::io::Write;
use std::panic;
use std::process;
use std::sync::Weak;

// A panic here almost always means a watermark check failed, so the report carries the pool's state at that moment alongside the message.
fn panic_report(message: String, appender: &Weak<LogAppender>) -> Value {
  let mut report = json!({
    "level": "CRITICAL",
    "panic": true,
    "message": message,
  });
  if let Some(a) = appender.upgrade() {
    let m = a.metrics();
    // The panicking thread may hold the pool lock, so never wait for it here.
    report["pool"] = json!(a.try_stats());
    report["position_gauge"] = json!(m.position_gauge());
    report["used_slots_gauge"] = json!(m.used_slots_gauge());
  };
  report
}

pub(crate) fn set_up_panic_hook(appender: Weak<LogAppender>) {
  panic::set_hook(Box::new(move |panic_info| {
    let bt = Backtrace::force_capture();
    // Don't use `tracing::*` from within the panic handler, as the subscriber could itself panic.
    let mut report = panic_report(panic_info.to_string(), &appender);
    report["stack_trace"] = json!(bt.to_string());
    let json = format!("\r\n{}\r\n", report);
    let mut out = stderr();
    let _ = out.write_all(json.as_bytes());
    let _ = out.flush();
    process::exit(1);
  }));
}

#[cfg(test)]
mod tests {
  use super::panic_report;
  use libwriteslots::LogAppender;
  use libwriteslots::Metrics;
  use serde_json::json;
  use std::sync::Arc;
  use std::sync::Weak;

  #[test]
  fn test_report_includes_pool_state() {
    let appender = Arc::new(LogAppender::new(4, 0, Arc::new(Metrics::default())));
    let r1 = appender.try_reserve(10).unwrap().unwrap();
    let r2 = appender.try_reserve(10).unwrap().unwrap();
    appender.complete(r1).unwrap();
    let report = panic_report(
      "position 10 is past pending write at 5".to_string(),
      &Arc::downgrade(&appender),
    );
    assert_eq!(report["level"], "CRITICAL");
    assert_eq!(report["pool"]["used"], 1);
    assert_eq!(report["pool"]["position"], 10);
    assert_eq!(report["pool"]["oldest_pending"], 10);
    assert_eq!(report["position_gauge"], 10);
    assert_eq!(report["used_slots_gauge"], 1);
    appender.complete(r2).unwrap();
  }

  #[test]
  fn test_report_without_appender() {
    let report = panic_report("boom".to_string(), &Weak::new());
    assert_eq!(report["message"], "boom");
    assert_eq!(report.get("pool"), None);
    assert_eq!(report["panic"], json!(true));
  }
}
