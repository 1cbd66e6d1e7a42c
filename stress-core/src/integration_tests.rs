// stress-core/src/integration_tests.rs
// End-to-end runs through the controller

#[cfg(test)]
mod integration_tests {
    use crate::config::{InstanceMode, RunConfig, StressorOptions, StressorSpec};
    use crate::controller::Controller;
    use crate::status::ExitStatus;
    use crate::stressors;
    use std::time::{Duration, Instant};

    fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }

    /// Small tunables so every stressor finishes quickly
    fn test_options() -> StressorOptions {
        StressorOptions {
            mmap_bytes: 64 * 1024,
            dirent_files: 16,
            fork_children: 2,
            cpu_samples: 1024,
        }
    }

    fn test_config(mode: InstanceMode, stressors: Vec<StressorSpec>) -> RunConfig {
        RunConfig {
            stressors,
            mode,
            timeout_secs: Some(30),
            seed: Some([521288629, 362436069]),
            verify: true,
            options: test_options(),
            ..RunConfig::default()
        }
    }

    fn spec(name: &str, instances: u32, ops: u64) -> StressorSpec {
        StressorSpec {
            name: name.to_string(),
            instances,
            ops,
        }
    }

    #[test]
    fn test_every_stressor_in_threads() {
        init_test_tracing();

        let specs = stressors::names().into_iter().map(|n| spec(n, 1, 5)).collect();
        let controller = Controller::new(test_config(InstanceMode::Thread, specs)).unwrap();
        let report = controller.run().unwrap();

        for summary in &report.stressors {
            match summary.status {
                ExitStatus::Success => assert_eq!(summary.bogo_ops, 5, "{}", summary.name),
                ExitStatus::NotImplemented => assert_eq!(summary.bogo_ops, 0, "{}", summary.name),
                other => panic!("{} ended with {}", summary.name, other),
            }
            assert_eq!(summary.failures, 0, "{}", summary.name);
        }
    }

    #[test]
    fn test_every_stressor_in_processes() {
        init_test_tracing();

        let specs = stressors::names().into_iter().map(|n| spec(n, 2, 3)).collect();
        let controller = Controller::new(test_config(InstanceMode::Process, specs)).unwrap();
        let report = controller.run().unwrap();

        for summary in &report.stressors {
            assert!(
                matches!(summary.status, ExitStatus::Success | ExitStatus::NotImplemented),
                "{} ended with {}",
                summary.name,
                summary.status
            );
            if summary.status == ExitStatus::Success {
                assert_eq!(summary.bogo_ops, 6, "{}", summary.name);
            }
        }
        assert!(matches!(report.exit_status(), ExitStatus::Success | ExitStatus::NotImplemented));
    }

    #[test]
    fn test_repeated_stressor_names_in_threads() {
        init_test_tracing();

        let specs = vec![spec("mmap", 1, 200), spec("mmap", 1, 20), spec("dirent", 1, 300), spec("dirent", 1, 5)];
        let controller = Controller::new(test_config(InstanceMode::Thread, specs)).unwrap();
        let report = controller.run().unwrap();

        assert_eq!(report.total_failures, 0);
        let expected = [200, 20, 300, 5];
        for (summary, ops) in report.stressors.iter().zip(expected) {
            assert_eq!(summary.status, ExitStatus::Success, "{}", summary.name);
            assert_eq!(summary.bogo_ops, ops, "{}", summary.name);
            assert_eq!(summary.failures, 0, "{}", summary.name);
        }
    }

    #[test]
    fn test_timeout_stops_unbounded_processes() {
        init_test_tracing();

        let mut config = test_config(InstanceMode::Process, vec![spec("cpu", 2, 0), spec("mmap", 1, 0)]);
        config.timeout_secs = Some(1);
        let controller = Controller::new(config).unwrap();

        let start = Instant::now();
        let report = controller.run().unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(5), "run took {:?}", elapsed);
        assert_eq!(report.exit_status(), ExitStatus::Success);
        for summary in &report.stressors {
            assert!(summary.bogo_ops > 0, "{} made no progress", summary.name);
            assert!(summary.bogo_ops_per_sec_real > 0.0);
        }
    }

    #[test]
    fn test_stop_handle_interrupts_processes() {
        init_test_tracing();

        let controller = Controller::new(test_config(InstanceMode::Process, vec![spec("fork", 1, 0)])).unwrap();
        let handle = controller.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            handle.stop();
        });

        let start = Instant::now();
        let report = controller.run().unwrap();
        stopper.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.stressors[0].status, ExitStatus::Success);
    }

    #[test]
    fn test_json_report_written() {
        init_test_tracing();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let controller = Controller::new(test_config(InstanceMode::Thread, vec![spec("cpu", 1, 10)])).unwrap();
        let report = controller.run().unwrap();
        report.write_json(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["stressors"][0]["name"], "cpu");
        assert_eq!(value["stressors"][0]["bogo_ops"], 10);
        assert_eq!(value["status"], "success");
    }
}
