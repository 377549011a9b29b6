//! Kernel lifecycle and configuration acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A kernel built from a TOML file runs its startup tasks once due
//! - Invalid configuration is rejected before anything starts
//! - Shutdown discards pending work and stops the time base

use super::common::Recorder;
use rk_common::config::KernelConfig;
use rk_common::error::KernelError;
use rk_common::state::KernelState;
use rk_runtime::Kernel;
use std::io::Write;
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
[tick]
period = "5ms"

[queue]
capacity = 8

[event_log]
capacity = 16

[[startup_tasks]]
module = 2
service = 11
args = [1, 2, 3]

[[startup_tasks]]
module = 2
service = 12
delay = "30ms"
"#;

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

fn run_until(kernel: &mut Kernel, done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() && Instant::now() < deadline {
        kernel.run_once().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_startup_tasks_from_file() {
    let file = write_config(CONFIG);
    let config = KernelConfig::from_file(file.path()).unwrap();
    assert_eq!(config.tick.period, Duration::from_millis(5));
    assert_eq!(config.startup_tasks.len(), 2);

    let module = Recorder::new("m2");
    let mut kernel = Kernel::new(&config).unwrap();
    kernel.register(2, module.clone()).unwrap();
    kernel.initialize().unwrap();
    for task in &config.startup_tasks {
        kernel
            .schedule(task.module, task.service, task.delay, &task.args)
            .unwrap();
    }
    kernel.start().unwrap();

    run_until(&mut kernel, || module.calls().len() == 2);

    let calls = module.calls();
    assert_eq!(module.services(), vec![11, 12]);
    assert_eq!(calls[0].payload(), &[1, 2, 3]);
    assert!(calls[1].payload().is_empty());
    assert!(kernel.time_base().now_ms() >= 30);

    let log = kernel.dispatcher().event_log().unwrap();
    assert_eq!(log.len(), 2);
    kernel.shutdown().unwrap();
}

#[test]
fn test_invalid_files_rejected() {
    let file = write_config("[queue]\ncapacity = 0\n");
    let config = KernelConfig::from_file(file.path()).unwrap();
    assert!(matches!(Kernel::new(&config), Err(KernelError::Config(_))));

    // 200 ms does not fit the 24-bit reload register at 120 MHz
    let file = write_config("[tick]\nperiod = \"200ms\"\n");
    let config = KernelConfig::from_file(file.path()).unwrap();
    assert!(matches!(
        Kernel::new(&config),
        Err(KernelError::InvalidTickPeriod { .. })
    ));

    let file = write_config("[tick]\nperiod = 5\n");
    assert!(KernelConfig::from_file(file.path()).is_err());
}

#[test]
fn test_shutdown_freezes_time_and_discards() {
    let mut config = KernelConfig::default();
    config.tick.period = Duration::from_millis(5);

    let mut kernel = Kernel::new(&config).unwrap();
    let queue = kernel.queue();
    let time_base = kernel.time_base();
    kernel.initialize().unwrap();
    kernel.start().unwrap();

    // Producers keep working through their handles
    queue.push_back_sync(1, 0, u64::MAX).unwrap();
    run_until(&mut kernel, || time_base.now_ms() >= 20);

    kernel.shutdown().unwrap();
    assert_eq!(kernel.state(), KernelState::Stopped);
    assert!(queue.is_empty());

    let frozen = time_base.now_ms();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(time_base.now_ms(), frozen);
}

#[test]
fn test_drop_stops_tick_thread() {
    let mut config = KernelConfig::default();
    config.tick.period = Duration::from_millis(5);

    let time_base = {
        let mut kernel = Kernel::new(&config).unwrap();
        kernel.initialize().unwrap();
        kernel.start().unwrap();
        kernel.time_base()
    };

    let frozen = time_base.now_ms();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(time_base.now_ms(), frozen);
}
