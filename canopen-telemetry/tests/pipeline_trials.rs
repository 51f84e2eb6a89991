// End-to-end trial runs against the replay driver

use canopen_telemetry::transport::BusEvent;
use canopen_telemetry::{
    AcquisitionConfig, AcquisitionPipeline, BusChannel, CanDriver, FieldMap, JsonlStore, MemoryStore,
    OutputMode, PowerConfig, PowerState, RawFrame, ReplayDriver, ReplayStep, Result, StopSignal,
    TrialManager, TrialOutcome, TrialPhase, TrialStore,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> AcquisitionConfig {
    AcquisitionConfig::new()
        .with_read_timeout(Duration::from_millis(1))
        .with_retry_backoff(Duration::ZERO)
        .with_power(PowerConfig::new().with_poll_interval(Duration::ZERO))
}

fn pipeline(stop: &StopSignal) -> AcquisitionPipeline {
    AcquisitionPipeline::new(
        test_config(),
        Arc::new(FieldMap::motor_controller()),
        stop.clone(),
    )
}

/// PDO1 frame carrying a DC bus voltage in bytes 6-7
fn voltage_frame(voltage: i16, timestamp: f64) -> ReplayStep {
    let [hi, lo] = voltage.to_be_bytes();
    ReplayStep::Frame(RawFrame::new(390, vec![0, 1, 0, 0, 0, 0, hi, lo], timestamp))
}

fn torque_frame(seq: usize) -> ReplayStep {
    ReplayStep::Frame(RawFrame::new(646, vec![0, 0, 0, 0, 0, seq as u8, 0, 0], seq as f64))
}

/// Power on, `frames` torque frames, power off
fn powered_trial(frames: usize) -> Vec<ReplayStep> {
    let mut script = vec![
        voltage_frame(150, 0.0),
        voltage_frame(150, 0.1),
        voltage_frame(150, 0.2),
    ];
    script.extend((0..frames).map(torque_frame));
    script.extend([
        voltage_frame(20, 100.0),
        voltage_frame(20, 100.1),
        voltage_frame(20, 100.2),
    ]);
    script
}

fn count(events: &[BusEvent], wanted: &BusEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

#[test]
fn test_powered_trial_is_stored_in_batches() {
    let stop = StopSignal::new();
    let mut driver = ReplayDriver::new(powered_trial(117)).stop_when_exhausted(stop.clone());
    let mut store = MemoryStore::new();
    let mut pipeline = pipeline(&stop);

    let summary = pipeline.run(&mut driver, &mut store);

    // Trial 1 collects, trial 2 sees the script run out while awaiting power
    assert_eq!(summary.trials_completed, 2);
    assert_eq!(summary.failed_cycles, 0);
    assert_eq!(summary.frames_stored, 120);
    assert_eq!(store.batch_sizes(), &[50, 50, 20]);

    let rows = store.load_trial(1).unwrap();
    assert_eq!(rows.len(), 120);
    assert!(rows[..117].iter().all(|r| r.message_id == 646));
    assert!(rows[117..].iter().all(|r| r.message_id == 390));
    assert_eq!(rows[5].timestamp_seconds, 5.0);

    assert!(store.load_trial(2).unwrap().is_empty());
    assert_eq!(pipeline.phase(), TrialPhase::Done);

    let events = driver.events();
    assert_eq!(count(&events, &BusEvent::Opened(0)), 2);
    assert_eq!(count(&events, &BusEvent::BusOn), 2);
    assert_eq!(count(&events, &BusEvent::BusOff), 2);
    assert!(events.contains(&BusEvent::BusParams(100_000)));
}

#[test]
fn test_noisy_voltage_does_not_end_trial() {
    let stop = StopSignal::new();
    let mut script = powered_trial(0);
    // Replace the clean power-off with a dip, a recovery, then the real power-off
    script.truncate(3);
    script.extend([
        voltage_frame(20, 1.0),
        voltage_frame(20, 1.1),
        voltage_frame(300, 1.2),
        voltage_frame(20, 1.3),
        voltage_frame(20, 1.4),
        voltage_frame(20, 1.5),
        voltage_frame(20, 1.6),
    ]);
    let mut driver = ReplayDriver::new(script).stop_when_exhausted(stop.clone());
    let mut store = MemoryStore::new();
    let mut pipeline = pipeline(&stop);

    let report = pipeline.run_cycle(&mut driver, &mut store).unwrap();
    assert_eq!(report.outcome, TrialOutcome::PowerOff);
    assert_eq!(report.frames_stored, 6);
    // The frame after power-off stays on the bus for the next trial
    assert_eq!(driver.remaining(), 1);
}

#[test]
fn test_stop_while_awaiting_power_stores_nothing() {
    let stop = StopSignal::new();
    let mut driver = ReplayDriver::new(powered_trial(10));
    let mut store = MemoryStore::new();
    let mut pipeline = pipeline(&stop);

    stop.raise();
    let report = pipeline.run_cycle(&mut driver, &mut store).unwrap();

    assert_eq!(report.outcome, TrialOutcome::NoPower);
    assert_eq!(report.frames_stored, 0);
    assert_eq!(report.batches_flushed, 0);
    assert!(store.batch_sizes().is_empty());
    assert_eq!(pipeline.phase(), TrialPhase::Done);
    assert_eq!(pipeline.power_state(), PowerState::AwaitingPower);

    // The channel was still released
    assert_eq!(count(&driver.events(), &BusEvent::BusOff), 1);
}

#[test]
fn test_stop_while_collecting_flushes_queued_frames() {
    let stop = StopSignal::new();
    let mut script = powered_trial(75);
    script.truncate(3 + 75);
    let mut driver = ReplayDriver::new(script).stop_when_exhausted(stop.clone());
    let mut store = MemoryStore::new();
    let mut pipeline = pipeline(&stop);

    let report = pipeline.run_cycle(&mut driver, &mut store).unwrap();

    assert!(stop.is_raised());
    assert_eq!(report.outcome, TrialOutcome::Cancelled);
    assert_eq!(report.frames_stored, 75);
    assert_eq!(store.batch_sizes(), &[50, 25]);
    assert_eq!(pipeline.power_state(), PowerState::Active);
    assert_eq!(count(&driver.events(), &BusEvent::BusOff), 1);
}

/// Bus whose stop request arrives while a read is delivering a frame
struct InterruptedBus {
    stop: StopSignal,
    reads: usize,
    stop_on_read: usize,
}

impl CanDriver for InterruptedBus {
    type Channel = InterruptedChannel;

    fn open_channel(&mut self, _channel: u32) -> Result<InterruptedChannel> {
        Ok(InterruptedChannel {
            stop: self.stop.clone(),
            reads: self.reads,
            stop_on_read: self.stop_on_read,
        })
    }
}

struct InterruptedChannel {
    stop: StopSignal,
    reads: usize,
    stop_on_read: usize,
}

impl BusChannel for InterruptedChannel {
    fn set_bus_output_control(&mut self, _mode: OutputMode) -> Result<()> {
        Ok(())
    }

    fn set_bus_params(&mut self, _bitrate: u32) -> Result<()> {
        Ok(())
    }

    fn bus_on(&mut self) -> Result<()> {
        Ok(())
    }

    fn bus_off(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<Option<RawFrame>> {
        self.reads += 1;
        let timestamp = self.reads as f64;
        if self.reads <= 3 {
            return Ok(Some(RawFrame::new(390, vec![0, 0, 0, 0, 0, 0, 0, 150], timestamp)));
        }
        if self.reads == self.stop_on_read {
            self.stop.raise();
        }
        Ok(Some(RawFrame::new(646, vec![0; 8], timestamp)))
    }
}

#[test]
fn test_frame_read_during_stop_is_stored() {
    let stop = StopSignal::new();
    let mut driver = InterruptedBus {
        stop: stop.clone(),
        reads: 0,
        stop_on_read: 6,
    };
    let mut store = MemoryStore::new();
    let mut pipeline = pipeline(&stop);

    let report = pipeline.run_cycle(&mut driver, &mut store).unwrap();

    assert_eq!(report.outcome, TrialOutcome::Cancelled);
    let timestamps: Vec<f64> = store
        .load_trial(report.trial)
        .unwrap()
        .iter()
        .map(|r| r.timestamp_seconds)
        .collect();
    assert_eq!(timestamps, vec![4.0, 5.0, 6.0]);
}

#[test]
fn test_burst_of_low_voltage_counts_once_per_poll_interval() {
    let stop = StopSignal::new();
    let config = test_config()
        .with_power(PowerConfig::new().with_poll_interval(Duration::from_millis(100)));
    let mut script = powered_trial(0);
    script.truncate(3);
    script.extend([
        voltage_frame(20, 10.000),
        voltage_frame(20, 10.010),
        voltage_frame(20, 10.020),
        torque_frame(11),
        torque_frame(12),
        voltage_frame(20, 10.250),
        voltage_frame(20, 10.500),
        torque_frame(13),
    ]);
    let mut driver = ReplayDriver::new(script).stop_when_exhausted(stop.clone());
    let mut store = MemoryStore::new();
    let mut pipeline = AcquisitionPipeline::new(config, Arc::new(FieldMap::motor_controller()), stop);

    let report = pipeline.run_cycle(&mut driver, &mut store).unwrap();

    assert_eq!(report.outcome, TrialOutcome::PowerOff);
    assert_eq!(report.frames_stored, 7);
    assert_eq!(driver.remaining(), 1);
}

#[test]
fn test_silence_and_unknown_frames_are_tolerated() {
    let stop = StopSignal::new();
    let script = vec![
        ReplayStep::Silence,
        voltage_frame(150, 0.0),
        ReplayStep::Frame(RawFrame::new(0x700, vec![5], 0.05)),
        voltage_frame(150, 0.1),
        ReplayStep::Silence,
        voltage_frame(150, 0.2),
        ReplayStep::Silence,
        ReplayStep::Frame(RawFrame::new(0x700, vec![5], 0.3)),
        ReplayStep::Frame(RawFrame::new(390, vec![0, 1], 0.4)),
        voltage_frame(10, 0.5),
        voltage_frame(10, 0.6),
        voltage_frame(10, 0.7),
    ];
    let mut driver = ReplayDriver::new(script).stop_when_exhausted(stop.clone());
    let mut store = MemoryStore::new();
    let mut pipeline = pipeline(&stop);

    let report = pipeline.run_cycle(&mut driver, &mut store).unwrap();
    assert_eq!(report.outcome, TrialOutcome::PowerOff);
    assert_eq!(report.frames_stored, 5);

    let rows = store.load_trial(report.trial).unwrap();
    assert_eq!(rows[0].message_id, 0x700);
    assert_eq!(rows[1].payload, vec![0, 1]);
}

#[test]
fn test_failed_cycle_is_retried_with_new_trial() {
    let stop = StopSignal::new();
    let mut driver = ReplayDriver::new(powered_trial(3))
        .fail_next_opens(1)
        .stop_when_exhausted(stop.clone());
    let mut store = MemoryStore::new();
    let mut pipeline = pipeline(&stop);

    let summary = pipeline.run(&mut driver, &mut store);

    assert_eq!(summary.failed_cycles, 1);
    assert_eq!(summary.frames_stored, 6);
    // Trial 1 failed to open the bus, trial 2 collected, trial 3 ran out of script
    assert_eq!(store.list_trials().unwrap(), vec![1, 2, 3]);
    assert!(store.load_trial(1).unwrap().is_empty());
    assert_eq!(store.load_trial(2).unwrap().len(), 6);
}

#[test]
fn test_failed_store_does_not_leak_into_next_trial() {
    let stop = StopSignal::new();
    let mut script = powered_trial(60);
    script.extend(powered_trial(2));
    let mut driver = ReplayDriver::new(script).stop_when_exhausted(stop.clone());
    let mut store = MemoryStore::new();
    store.fail_next_stores(1);
    let mut pipeline = pipeline(&stop);

    let summary = pipeline.run(&mut driver, &mut store);

    assert_eq!(summary.failed_cycles, 1);
    // First batch of trial 1 was rejected; its remaining frames are dropped
    // instead of being stored under trial 2
    assert_eq!(store.load_trial(2).unwrap().len(), 5);
}

#[test]
fn test_missing_voltage_field_fails_the_cycle() {
    let stop = StopSignal::new();
    let mut driver = ReplayDriver::new(powered_trial(1));
    let mut store = MemoryStore::new();
    let mut pipeline = AcquisitionPipeline::new(test_config(), Arc::new(FieldMap::new()), stop);

    assert!(pipeline.run_cycle(&mut driver, &mut store).is_err());
    // The channel was never opened
    assert!(driver.events().is_empty());
}

#[test]
fn test_trials_persist_and_export_to_disk() {
    let data = tempfile::tempdir().unwrap();
    let csv_dir = data.path().join("csv");
    let stop = StopSignal::new();
    let mut driver = ReplayDriver::new(powered_trial(4)).stop_when_exhausted(stop.clone());
    let mut store = JsonlStore::open(data.path().join("trials")).unwrap();
    let mut pipeline = pipeline(&stop).with_export_dir(&csv_dir);

    let report = pipeline.run_cycle(&mut driver, &mut store).unwrap();
    assert_eq!(report.frames_stored, 7);

    let csv_path = report.export.expect("trial exported");
    let csv = std::fs::read_to_string(csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 8);
    assert!(lines[0].starts_with("Trial Number,Timestamp,Message ID,PDO Label,DLC,Flags,Status word"));
    assert!(lines[1].starts_with("1,0,646,PDO2,8,0,"));
    assert!(lines[7].starts_with("1,100.2,390,PDO1,8,0,1,0,0,20,"));

    // Reopening the store continues the numbering
    let mut reopened = JsonlStore::open(data.path().join("trials")).unwrap();
    let next = TrialManager::new(Arc::new(FieldMap::motor_controller()))
        .begin(&mut reopened)
        .unwrap();
    assert_eq!(next.number, 2);
}

#[test]
fn test_replay_channel_reports_no_message_after_script() {
    let mut driver = ReplayDriver::new(vec![ReplayStep::Silence]);
    let mut channel = driver.open_channel(0).unwrap();
    assert_eq!(channel.read(Duration::ZERO).unwrap(), None);
    assert_eq!(channel.read(Duration::ZERO).unwrap(), None);
}
