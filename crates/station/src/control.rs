//! The control loop. `Station` owns every piece of mutable device state;
//! the loop is the only code that touches it, so nothing here is locked.
//!
//! Each tick: serve at most one pending API request to completion, take a
//! fresh reading, update alert state, then sleep for the tick interval.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::alert::{AlertState, AlertTracker, Notification};
use crate::api::{self, CommandEcho, CommandError, StatusReport};
use crate::config::Config;
use crate::hw::{RelayPort, SensorPort};
use crate::pump::PumpBoard;
use crate::sensors::SensorAcquisition;

/// An API call waiting for the control loop, with a slot for its answer.
#[derive(Debug)]
pub enum Request {
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Command {
        pump_id: String,
        token: Option<String>,
        reply: oneshot::Sender<Result<CommandEcho, CommandError>>,
    },
}

pub struct Station<S, R> {
    pub(crate) config: Config,
    pub(crate) sensors: SensorAcquisition<S>,
    pub(crate) tracker: AlertTracker,
    pub(crate) alerts: AlertState,
    pub(crate) pumps: PumpBoard<R>,
}

impl<S: SensorPort, R: RelayPort> Station<S, R> {
    pub fn new(config: Config, sensor_port: S, relays: R) -> Self {
        let sensors = SensorAcquisition::new(
            sensor_port,
            config.moisture.source(),
            config.rain.active_low,
        );
        let pumps = PumpBoard::new(relays, &config.pumps, config.relay_active_low);
        Self {
            tracker: AlertTracker::new(config.moisture_threshold),
            alerts: AlertState::default(),
            sensors,
            pumps,
            config,
        }
    }

    /// Run one API request to completion and send back its answer.
    pub fn handle(&mut self, request: Request) {
        match request {
            Request::Status { reply } => {
                let report = api::status(self);
                if reply.send(report).is_err() {
                    debug!("status requester went away");
                }
            }
            Request::Command {
                pump_id,
                token,
                reply,
            } => {
                let outcome = api::command(self, &pump_id, token.as_deref());
                if reply.send(outcome).is_err() {
                    debug!(pump = %pump_id, "command requester went away");
                }
            }
        }
    }

    /// One pass of the loop, without the sleep.
    pub fn tick(&mut self, inbox: &mut mpsc::Receiver<Request>) -> Vec<Notification> {
        if let Ok(request) = inbox.try_recv() {
            self.handle(request);
        }
        self.sensors.set_watering(self.pumps.any_energized());
        let reading = self.sensors.read();
        self.tracker.observe(&mut self.alerts, &reading)
    }

    /// Tick until `shutdown` resolves, then switch off every controllable
    /// pump.
    pub async fn run(
        &mut self,
        inbox: &mut mpsc::Receiver<Request>,
        shutdown: impl Future<Output = ()>,
    ) {
        let interval = self.config.tick();
        tokio::pin!(shutdown);

        info!(
            tick_ms = self.config.tick_ms,
            threshold = self.config.moisture_threshold,
            pumps = self.config.pumps.len(),
            "control loop started"
        );

        loop {
            self.tick(inbox);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("control loop stopping");
        self.pumps.all_off();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alert::RainState;
    use crate::api::StateField;
    use crate::config::PumpEntry;
    use crate::hw::fake::FakeSensors;
    use crate::hw::{Level, MemoryRelays};

    pub(crate) fn station(sensors: FakeSensors) -> Station<FakeSensors, MemoryRelays> {
        station_with(Config::default(), sensors)
    }

    pub(crate) fn station_with(
        config: Config,
        sensors: FakeSensors,
    ) -> Station<FakeSensors, MemoryRelays> {
        Station::new(config, sensors, MemoryRelays::new())
    }

    type Reply = oneshot::Receiver<Result<CommandEcho, CommandError>>;

    fn command(pump_id: &str, token: &str) -> (Request, Reply) {
        let (reply, rx) = oneshot::channel();
        let request = Request::Command {
            pump_id: pump_id.into(),
            token: Some(token.into()),
            reply,
        };
        (request, rx)
    }

    /// Raw value that maps to `pct` on the default 3500/1500 calibration.
    fn raw_for(pct: u16) -> u16 {
        3500 - pct * 20
    }

    // -- tick: alert tracking -----------------------------------------------

    #[test]
    fn first_tick_reports_rain_state() {
        let mut st = station(FakeSensors::default());
        let (_tx, mut inbox) = mpsc::channel(4);

        let fired = st.tick(&mut inbox);
        assert_eq!(fired, vec![Notification::Rain(RainState::NotRaining)]);
        assert!(st.tick(&mut inbox).is_empty());
    }

    #[test]
    fn moisture_arms_at_29_and_clears_at_31() {
        let mut st = station(FakeSensors::default());
        let (_tx, mut inbox) = mpsc::channel(4);
        st.tick(&mut inbox);

        st.sensors.port_mut().soil_raw = raw_for(29);
        assert_eq!(
            st.tick(&mut inbox),
            vec![Notification::MoistureLow { pct: 29.0 }]
        );
        assert!(st.alerts.moisture_alert_latched);

        st.sensors.port_mut().soil_raw = raw_for(31);
        assert_eq!(
            st.tick(&mut inbox),
            vec![Notification::MoistureNormal { pct: 31.0 }]
        );
        assert!(st.tick(&mut inbox).is_empty());
        assert!(!st.alerts.moisture_alert_latched);
    }

    #[test]
    fn threshold_reading_does_not_arm() {
        let mut st = station(FakeSensors {
            soil_raw: raw_for(30),
            ..FakeSensors::default()
        });
        let (_tx, mut inbox) = mpsc::channel(4);
        st.tick(&mut inbox);
        assert!(!st.alerts.moisture_alert_latched);
    }

    #[test]
    fn rain_edges_across_ticks() {
        let mut st = station(FakeSensors::default());
        let (_tx, mut inbox) = mpsc::channel(4);
        st.tick(&mut inbox);

        st.sensors.port_mut().rain_level = Level::Low;
        assert_eq!(
            st.tick(&mut inbox),
            vec![Notification::Rain(RainState::Raining)]
        );
        assert!(st.tick(&mut inbox).is_empty());
        assert_eq!(st.alerts.last_rain_state, RainState::Raining);
    }

    // -- tick: request service ----------------------------------------------

    #[test]
    fn tick_serves_one_request() {
        let mut st = station(FakeSensors::default());
        let (tx, mut inbox) = mpsc::channel(4);

        let (first, mut first_rx) = command("bomba1", "on");
        let (second, mut second_rx) = command("bomba2", "on");
        tx.try_send(first).unwrap();
        tx.try_send(second).unwrap();

        st.tick(&mut inbox);
        assert_eq!(
            first_rx.try_recv().unwrap().unwrap().state,
            StateField::Word("ligada")
        );
        assert!(second_rx.try_recv().is_err(), "second request served early");
        assert!(!st.pumps.get("bomba2").unwrap().energized);

        st.tick(&mut inbox);
        assert!(second_rx.try_recv().unwrap().is_ok());
        assert!(st.pumps.get("bomba2").unwrap().energized);
    }

    #[test]
    fn tick_reports_watering_to_sensors() {
        let mut st = station(FakeSensors::default());
        let (tx, mut inbox) = mpsc::channel(4);

        st.tick(&mut inbox);
        assert!(!st.sensors.port_mut().watering);

        let (on, _on_rx) = command("bomba1", "on");
        tx.try_send(on).unwrap();
        st.tick(&mut inbox);
        assert!(st.sensors.port_mut().watering);

        let (off, _off_rx) = command("bomba1", "off");
        tx.try_send(off).unwrap();
        st.tick(&mut inbox);
        assert!(!st.sensors.port_mut().watering);
    }

    #[test]
    fn tick_after_all_off_stops_watering() {
        let mut st = station(FakeSensors::default());
        let (tx, mut inbox) = mpsc::channel(4);
        let (on, _rx) = command("bomba2", "on");
        tx.try_send(on).unwrap();
        st.tick(&mut inbox);
        assert!(st.sensors.port_mut().watering);

        st.pumps.all_off();
        st.tick(&mut inbox);
        assert!(!st.sensors.port_mut().watering);
    }

    #[test]
    fn tick_with_empty_inbox_still_samples() {
        let mut st = station(FakeSensors {
            soil_raw: raw_for(10),
            ..FakeSensors::default()
        });
        let (_tx, mut inbox) = mpsc::channel(4);
        let fired = st.tick(&mut inbox);
        assert!(fired.contains(&Notification::MoistureLow { pct: 10.0 }));
    }

    #[test]
    fn tick_survives_closed_inbox() {
        let mut st = station(FakeSensors::default());
        let (tx, mut inbox) = mpsc::channel::<Request>(4);
        drop(tx);
        assert_eq!(st.tick(&mut inbox).len(), 1);
    }

    #[test]
    fn handle_status_replies() {
        let mut st = station(FakeSensors::default());
        let (reply, mut rx) = oneshot::channel();
        st.handle(Request::Status { reply });
        assert_eq!(rx.try_recv().unwrap().rain, "Sem chuva");
    }

    #[test]
    fn handle_command_error_replies() {
        let mut st = station(FakeSensors::default());
        let (reply, mut rx) = oneshot::channel();
        st.handle(Request::Command {
            pump_id: "bomba1".into(),
            token: None,
            reply,
        });
        assert_eq!(rx.try_recv().unwrap(), Err(CommandError::MissingParameter));
    }

    #[test]
    fn handle_tolerates_dropped_requester() {
        let mut st = station(FakeSensors::default());
        let (request, rx) = command("bomba1", "on");
        drop(rx);
        st.handle(request);
        assert!(st.pumps.get("bomba1").unwrap().energized);
    }

    // -- run ----------------------------------------------------------------

    #[tokio::test]
    async fn run_switches_pumps_off_on_shutdown() {
        let mut st = station(FakeSensors::default());
        let (tx, mut inbox) = mpsc::channel(4);

        let (request, mut rx) = command("bomba1", "on");
        tx.send(request).await.unwrap();

        st.run(&mut inbox, std::future::ready(())).await;

        // Served during the single tick, then released on the way out.
        assert!(rx.try_recv().unwrap().is_ok());
        assert!(!st.pumps.get("bomba1").unwrap().energized);
    }

    #[tokio::test]
    async fn run_leaves_hardwired_pump_running() {
        let config = Config {
            pumps: vec![PumpEntry {
                id: "bomba1".into(),
                gpio: 23,
                controllable: false,
                always_on: true,
            }],
            ..Config::default()
        };
        let mut st = station_with(config, FakeSensors::default());
        let (_tx, mut inbox) = mpsc::channel(4);

        st.run(&mut inbox, std::future::ready(())).await;
        assert!(st.pumps.get("bomba1").unwrap().energized);
    }
}
