//! Integration tests for the analyzer pipeline.
//!
//! Tests cover:
//! - Grid alignment properties (shared grid, truncation, idempotence)
//! - Weight resolution and cycle rejection through a full job
//! - Continuous and session jobs end to end with mock ports
//! - Update windows, empty inputs and all-or-nothing failure behavior
//! - Market data cache locking under concurrent callers
//! - Re-running a job against SQLite reproduces the stored window

mod common;

use alphapool_analyzer::domain::Timestamp;
use alphapool_analyzer::domain::error::AnalyzerError;
use alphapool_analyzer::domain::job::{JobConfig, UpdateWindow, run_job};
use alphapool_analyzer::domain::position::{Column, PositionFrame};
use alphapool_analyzer::domain::resample::resample;
use alphapool_analyzer::domain::returns::ReturnMode;
use approx::assert_relative_eq;
use chrono::Duration;
use common::*;
use std::sync::Arc;

fn continuous_config() -> JobConfig {
    JobConfig::preset(ReturnMode::Continuous)
}

/// Model `a` holds BTC; model `b` is short ETH and allocates half of `a`.
fn continuous_positions() -> Vec<PositionRecord> {
    vec![
        PositionRecord::new("a", ts(0, 0)).with_position("BTC", 1.0),
        PositionRecord::new("a", ts(0, 5)).with_position("BTC", 2.0),
        PositionRecord::new("b", ts(0, 5))
            .with_position("ETH", -1.0)
            .with_weight("a", 0.5),
    ]
}

fn continuous_market() -> MockMarketData {
    MockMarketData::new()
        .with_bars(
            "BTCUSDT",
            vec![
                make_bar("BTCUSDT", ts(0, 0), 100.0),
                make_bar("BTCUSDT", ts(0, 5), 110.0),
                make_bar("BTCUSDT", ts(0, 10), 99.0),
                make_bar("BTCUSDT", ts(0, 15), 99.0),
            ],
        )
        .with_bars(
            "ETHUSDT",
            vec![
                make_bar("ETHUSDT", ts(0, 0), 10.0),
                make_bar("ETHUSDT", ts(0, 5), 10.0),
                make_bar("ETHUSDT", ts(0, 10), 11.0),
                make_bar("ETHUSDT", ts(0, 15), 11.0),
            ],
        )
}

mod grid_alignment {
    use super::*;
    use proptest::prelude::*;

    const MODELS: [&str; 3] = ["a", "b", "c"];
    const SYMBOLS: [&str; 2] = ["BTC", "ETH"];

    fn frame_from(cells: &[(usize, i64, i32, usize)]) -> PositionFrame {
        let records: Vec<PositionRecord> = cells
            .iter()
            .map(|(m, offset, value, s)| {
                PositionRecord::new(MODELS[*m], ts(0, 0) + Duration::minutes(*offset))
                    .with_position(SYMBOLS[*s], *value as f64)
            })
            .collect();
        PositionFrame::from_records(&records)
    }

    #[test]
    fn models_share_one_grid() {
        let frame = PositionFrame::from_records(&[
            PositionRecord::new("early", ts(0, 0)).with_position("BTC", 1.0),
            PositionRecord::new("late", ts(0, 12)).with_position("BTC", 3.0),
        ]);
        let out = resample(&frame, Duration::minutes(5), ts(0, 20)).unwrap();

        let early: Vec<Timestamp> = out.model_rows("early").unwrap().keys().copied().collect();
        let late: Vec<Timestamp> = out.model_rows("late").unwrap().keys().copied().collect();
        assert_eq!(early, late);
        assert_eq!(early.first(), Some(&(ts(0, 0) - Duration::minutes(5))));
        assert_eq!(early.last(), Some(&ts(0, 20)));

        let btc = Column::Symbol("BTC".into());
        assert_eq!(out.value("late", ts(0, 10), &btc), Some(0.0));
        assert_eq!(out.value("late", ts(0, 15), &btc), Some(3.0));
    }

    #[test]
    fn observations_after_execution_time_are_ignored() {
        let frame = PositionFrame::from_records(&[
            PositionRecord::new("m", ts(0, 0)).with_position("BTC", 1.0),
            PositionRecord::new("m", ts(0, 30)).with_position("BTC", 9.0),
        ]);
        let out = resample(&frame, Duration::minutes(5), ts(0, 10)).unwrap();
        let rows = out.model_rows("m").unwrap();
        assert!(rows.keys().all(|t| *t <= ts(0, 10)));
        assert!(rows.values().all(|row| row.values().all(|v| *v <= 1.0)));
    }

    proptest! {
        #[test]
        fn resampling_an_aligned_frame_is_a_no_op(
            cells in prop::collection::vec((0usize..3, 0i64..180, -5i32..5, 0usize..2), 1..30)
        ) {
            let frame = frame_from(&cells);
            let exec = ts(3, 0);
            let once = resample(&frame, Duration::minutes(5), exec).unwrap();
            let twice = resample(&once, Duration::minutes(5), exec).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn every_model_covers_the_full_grid(
            cells in prop::collection::vec((0usize..3, 0i64..180, -5i32..5, 0usize..2), 1..30)
        ) {
            let frame = frame_from(&cells);
            let exec = ts(3, 0);
            let interval = Duration::minutes(5);
            let out = resample(&frame, interval, exec).unwrap();

            let anchor = out.min_timestamp().unwrap();
            let expected: Vec<Timestamp> = std::iter::successors(Some(anchor), |t| Some(*t + interval))
                .take_while(|t| *t <= exec)
                .collect();
            for model_id in out.model_ids() {
                let keys: Vec<Timestamp> = out.model_rows(model_id).unwrap().keys().copied().collect();
                prop_assert_eq!(&keys, &expected);
            }
        }
    }
}

mod continuous_job {
    use super::*;

    #[test]
    fn attributes_returns_to_resolved_positions() {
        let positions = MockPositionPort::new(continuous_positions());
        let market = Arc::new(continuous_market());
        let store = MockResultStore::new();

        let summary = run_job(
            &continuous_config(),
            ts(0, 17),
            &positions,
            market.clone(),
            &store,
        )
        .unwrap();

        assert_eq!(summary.execution_time, ts(0, 15));
        assert_eq!(summary.min_update_time, Some(ts(0, 0)));
        assert_eq!(summary.models, 2);
        assert_eq!(summary.symbols, 2);
        assert_eq!(store.writes.get(), 1);
        assert_eq!(store.vacuums.get(), 1);

        // b's BTC exposure comes entirely from its weight on a.
        assert_eq!(store.position_at(ts(0, 5), "b", "BTC"), Some(1.0));
        assert_eq!(store.position_at(ts(0, 5), "b", "a"), Some(0.5));

        assert_relative_eq!(store.return_at(ts(0, 0), "a").unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(store.return_at(ts(0, 5), "a").unwrap(), -0.2, epsilon = 1e-12);
        assert_relative_eq!(store.return_at(ts(0, 5), "b").unwrap(), -0.2, epsilon = 1e-12);
        assert_relative_eq!(store.return_at(ts(0, 10), "b").unwrap(), 0.0, epsilon = 1e-12);

        // The last bar has no next close, so 00:15 carries no return.
        assert_eq!(store.return_at(ts(0, 15), "a"), None);
        assert_eq!(summary.return_rows, 6);
        // Three active columns, two models, four grid slots from 00:00.
        assert_eq!(summary.position_rows, 24);
    }

    #[test]
    fn position_diffs_follow_each_model() {
        let positions = MockPositionPort::new(continuous_positions());
        let store = MockResultStore::new();
        run_job(
            &continuous_config(),
            ts(0, 17),
            &positions,
            Arc::new(continuous_market()),
            &store,
        )
        .unwrap();

        let rows = store.positions.borrow();
        let diff = |t: Timestamp| {
            rows.iter()
                .find(|p| p.timestamp == t && p.model_id == "a" && p.symbol == "BTC")
                .map(|p| p.position_diff)
        };
        assert_eq!(diff(ts(0, 0)), Some(1.0));
        assert_eq!(diff(ts(0, 5)), Some(1.0));
        assert_eq!(diff(ts(0, 10)), Some(0.0));
    }

    #[test]
    fn empty_market_data_drops_the_symbol() {
        let positions = MockPositionPort::new(continuous_positions());
        let market = MockMarketData::new().with_bars(
            "BTCUSDT",
            vec![
                make_bar("BTCUSDT", ts(0, 0), 100.0),
                make_bar("BTCUSDT", ts(0, 5), 110.0),
            ],
        );
        let store = MockResultStore::new();
        let summary = run_job(
            &continuous_config(),
            ts(0, 17),
            &positions,
            Arc::new(market),
            &store,
        )
        .unwrap();

        assert_eq!(summary.symbols, 1);
        assert_relative_eq!(store.return_at(ts(0, 0), "a").unwrap(), 0.1, epsilon = 1e-12);
        assert_eq!(store.return_at(ts(0, 0), "b"), Some(0.0));
    }

    #[test]
    fn portfolio_and_inactive_models_are_excluded() {
        let mut records = continuous_positions();
        records.push(PositionRecord::new("portfolio:all", ts(0, 5)).with_position("BTC", 5.0));
        records.push(
            PositionRecord::new("stale", ts(0, 0) - Duration::days(3)).with_position("BTC", 5.0),
        );
        let positions = MockPositionPort::new(records);
        let store = MockResultStore::new();
        let summary = run_job(
            &continuous_config(),
            ts(0, 17),
            &positions,
            Arc::new(continuous_market()),
            &store,
        )
        .unwrap();

        assert_eq!(summary.models, 2);
        assert!(store.returns.borrow().iter().all(|r| r.model_id == "a" || r.model_id == "b"));
    }

    #[test]
    fn delay_shift_moves_positions_when_enabled() {
        let mut config = continuous_config();
        config.execution_delay = Some(Duration::zero());
        let mut record = PositionRecord::new("a", ts(0, 0)).with_position("BTC", 1.0);
        record.delay = 300.0;
        let positions = MockPositionPort::new(vec![record]);
        let store = MockResultStore::new();
        run_job(&config, ts(0, 17), &positions, Arc::new(continuous_market()), &store).unwrap();

        assert_eq!(store.position_at(ts(0, 0), "a", "BTC"), Some(0.0));
        assert_eq!(store.position_at(ts(0, 5), "a", "BTC"), Some(1.0));
    }
}

mod session_job {
    use super::*;

    fn session_config() -> JobConfig {
        JobConfig::preset(ReturnMode::Session)
    }

    fn day(d: u32) -> Timestamp {
        ts(0, 0) + Duration::days(d as i64 - 15)
    }

    #[test]
    fn legs_line_up_with_filled_positions() {
        let positions =
            MockPositionPort::new(vec![PositionRecord::new("a", ts(0, 0)).with_position("7203", 100.0)]);
        let market = MockMarketData::new().with_bars(
            "7203",
            vec![
                make_session_bar("7203", day(15), 100.0, 102.0, 101.0, 103.0),
                make_session_bar("7203", day(16), 104.0, 104.0, 104.0, 104.0),
            ],
        );
        let store = MockResultStore::new();

        let summary = run_job(
            &session_config(),
            day(16) + Duration::hours(9),
            &positions,
            Arc::new(market),
            &store,
        )
        .unwrap();

        assert_eq!(summary.min_update_time, Some(day(16) + Duration::hours(9) - Duration::days(56)));
        assert_eq!(summary.models, 2);

        assert_relative_eq!(store.return_at(ts(0, 0), "a").unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(
            store.return_at(ts(2, 30), "a").unwrap(),
            100.0 * (101.0 / 102.0 - 1.0),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            store.return_at(ts(3, 30), "a").unwrap(),
            100.0 * (103.0 / 101.0 - 1.0),
            epsilon = 1e-9
        );
        // No position is stamped at the overnight leg.
        assert_eq!(store.return_at(ts(6, 0), "a"), None);

        // The equal-weighted model of a single model mirrors it.
        for t in [ts(0, 0), ts(2, 30), ts(3, 30)] {
            assert_eq!(store.return_at(t, "pf-equal"), store.return_at(t, "a"));
        }
    }

    #[test]
    fn trailing_window_fetches_one_day_before_the_update_cutoff() {
        let positions = MockPositionPort::new(Vec::new());
        let store = MockResultStore::new();
        let now = day(16) + Duration::hours(9);
        run_job(
            &session_config(),
            now,
            &positions,
            Arc::new(MockMarketData::new()),
            &store,
        )
        .unwrap();

        let requests = positions.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, Some(now - Duration::days(57)));
    }
}

mod update_window {
    use super::*;

    #[test]
    fn incremental_resumes_from_last_stored_position() {
        let existing = AnalyzerPosition {
            timestamp: ts(0, 10),
            model_id: "a".into(),
            symbol: "BTC".into(),
            position: 1.0,
            position_diff: 0.0,
            tournament: None,
        };
        let store = MockResultStore::new().with_positions(vec![existing]);
        let positions = MockPositionPort::new(continuous_positions());

        let summary = run_job(
            &continuous_config(),
            ts(0, 17),
            &positions,
            Arc::new(continuous_market()),
            &store,
        )
        .unwrap();

        assert_eq!(summary.min_update_time, Some(ts(0, 10) - Duration::days(1)));
        assert_eq!(summary.min_fetch_time, Some(ts(0, 10) - Duration::days(2)));
        assert_eq!(
            positions.requests.borrow()[0].1,
            Some(ts(0, 10) - Duration::days(2))
        );
    }

    #[test]
    fn first_run_fetches_full_history() {
        let store = MockResultStore::new();
        let positions = MockPositionPort::new(continuous_positions());
        run_job(
            &continuous_config(),
            ts(0, 17),
            &positions,
            Arc::new(continuous_market()),
            &store,
        )
        .unwrap();
        assert_eq!(positions.requests.borrow()[0], (None, None));
    }

    #[test]
    fn custom_window_lookbacks_are_applied() {
        let mut config = continuous_config();
        config.window = UpdateWindow::Trailing {
            update_span: Duration::hours(1),
            fetch_lookback: Duration::hours(2),
        };
        let store = MockResultStore::new();
        let positions = MockPositionPort::new(continuous_positions());
        let summary = run_job(
            &config,
            ts(0, 17),
            &positions,
            Arc::new(continuous_market()),
            &store,
        )
        .unwrap();
        assert_eq!(summary.min_update_time, Some(ts(0, 15) - Duration::hours(1)));
        assert_eq!(summary.min_fetch_time, Some(ts(0, 15) - Duration::hours(3)));
    }

    #[test]
    fn window_past_timestamp_range_is_an_error() {
        let mut config = continuous_config();
        config.window = UpdateWindow::Trailing {
            update_span: Duration::try_days(100_000_000).unwrap(),
            fetch_lookback: Duration::days(1),
        };
        let store = MockResultStore::new();
        let result = run_job(
            &config,
            ts(0, 17),
            &MockPositionPort::new(continuous_positions()),
            Arc::new(continuous_market()),
            &store,
        );
        assert!(matches!(result, Err(AnalyzerError::InvalidData { .. })));
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn long_inactivity_window_is_an_error_not_a_panic() {
        let mut config = continuous_config();
        config.inactive_after = Duration::try_days(100_000_000).unwrap();
        let store = MockResultStore::new();
        let result = run_job(
            &config,
            ts(0, 17),
            &MockPositionPort::new(continuous_positions()),
            Arc::new(continuous_market()),
            &store,
        );
        assert!(matches!(result, Err(AnalyzerError::InvalidData { .. })));
        assert_eq!(store.writes.get(), 0);
    }
}

mod failures {
    use super::*;

    #[test]
    fn no_positions_finishes_without_writing() {
        let store = MockResultStore::new();
        let market = Arc::new(MockMarketData::new());
        let summary = run_job(
            &continuous_config(),
            ts(0, 17),
            &MockPositionPort::new(Vec::new()),
            market.clone(),
            &store,
        )
        .unwrap();

        assert_eq!(summary.position_rows, 0);
        assert_eq!(summary.return_rows, 0);
        assert_eq!(store.writes.get(), 0);
        assert_eq!(market.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn fetch_failure_aborts_before_writing() {
        let store = MockResultStore::new();
        let market = continuous_market().with_error("ETHUSDT");
        let result = run_job(
            &continuous_config(),
            ts(0, 17),
            &MockPositionPort::new(continuous_positions()),
            Arc::new(market),
            &store,
        );

        match result {
            Err(AnalyzerError::MarketData(e)) => {
                assert!(e.key.contains("market=ETHUSDT"));
                assert!(e.stale.is_none());
            }
            other => panic!("expected MarketData error, got {other:?}"),
        }
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn weight_cycle_is_rejected_at_depth_two() {
        let mut config = continuous_config();
        config.weight_depth = 2;
        let positions = MockPositionPort::new(vec![
            PositionRecord::new("a", ts(0, 0))
                .with_position("BTC", 1.0)
                .with_weight("b", 1.0),
            PositionRecord::new("b", ts(0, 0))
                .with_position("BTC", 1.0)
                .with_weight("a", 1.0),
        ]);
        let store = MockResultStore::new();
        let result = run_job(
            &config,
            ts(0, 17),
            &positions,
            Arc::new(continuous_market()),
            &store,
        );

        assert!(matches!(result, Err(AnalyzerError::WeightCycle { .. })));
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn single_level_resolution_tolerates_cycles() {
        let positions = MockPositionPort::new(vec![
            PositionRecord::new("a", ts(0, 0))
                .with_position("BTC", 1.0)
                .with_weight("b", 1.0),
            PositionRecord::new("b", ts(0, 0))
                .with_position("BTC", 2.0)
                .with_weight("a", 1.0),
        ]);
        let store = MockResultStore::new();
        run_job(
            &continuous_config(),
            ts(0, 17),
            &positions,
            Arc::new(continuous_market()),
            &store,
        )
        .unwrap();

        assert_eq!(store.position_at(ts(0, 0), "a", "BTC"), Some(3.0));
        assert_eq!(store.position_at(ts(0, 0), "b", "BTC"), Some(3.0));
    }
}

mod market_data_cache {
    use super::*;
    use alphapool_analyzer::domain::market_data::MarketDataStore;
    use alphapool_analyzer::ports::market_data_port::{FetchRequest, MarketDataPort, MarketKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    /// Slow fetcher that records how many fetches overlap.
    struct Slow {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Slow {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl MarketDataPort for Slow {
        fn fetch_ohlcv(
            &self,
            request: &FetchRequest,
            _previous: Option<&OhlcvFrame>,
        ) -> Result<OhlcvFrame, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(StdDuration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(OhlcvFrame::new(vec![make_bar(&request.key.market, ts(0, 0), 1.0)]))
        }
    }

    /// Blocks fetches of `SLOW` until released; everything else returns at once.
    struct Gate {
        entered: parking_lot::Mutex<mpsc::Sender<()>>,
        release: parking_lot::Mutex<mpsc::Receiver<()>>,
    }

    impl MarketDataPort for Gate {
        fn fetch_ohlcv(
            &self,
            request: &FetchRequest,
            _previous: Option<&OhlcvFrame>,
        ) -> Result<OhlcvFrame, AnalyzerError> {
            if request.key.market == "SLOW" {
                self.entered.lock().send(()).unwrap();
                self.release.lock().recv().unwrap();
            }
            Ok(OhlcvFrame::new(vec![make_bar(&request.key.market, ts(0, 0), 1.0)]))
        }
    }

    #[test]
    fn concurrent_callers_share_one_fetch() {
        let fetcher = Arc::new(Slow::new());
        let store = MarketDataStore::new(fetcher.clone());
        let key = MarketKey::new("binance_future", "BTCUSDT", 300);

        let frames: Vec<OhlcvFrame> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.get(&key, false).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(frames.iter().all(|f| f.len() == 1));
    }

    #[test]
    fn forced_fetches_of_one_key_never_overlap() {
        let fetcher = Arc::new(Slow::new());
        let store = MarketDataStore::new(fetcher.clone());
        let key = MarketKey::new("binance_future", "BTCUSDT", 300);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| store.get(&key, true).unwrap());
            }
        });

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_do_not_block_each_other() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = MarketDataStore::new(Arc::new(Gate {
            entered: parking_lot::Mutex::new(entered_tx),
            release: parking_lot::Mutex::new(release_rx),
        }));
        let slow = MarketKey::new("jq", "SLOW", 86400);
        let fast = MarketKey::new("jq", "FAST", 86400);

        std::thread::scope(|scope| {
            let blocked = scope.spawn(|| store.get(&slow, false));
            entered_rx
                .recv_timeout(StdDuration::from_secs(5))
                .expect("slow fetch never started");

            let (done_tx, done_rx) = mpsc::channel();
            let (store, fast) = (&store, &fast);
            scope.spawn(move || {
                let frame = store.get(&fast, false);
                done_tx.send(frame.is_ok()).unwrap();
            });
            let finished = done_rx.recv_timeout(StdDuration::from_secs(5));

            release_tx.send(()).unwrap();
            assert!(blocked.join().unwrap().is_ok());
            assert_eq!(finished, Ok(true));
        });
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_job {
    use super::*;
    use alphapool_analyzer::adapters::sqlite_adapter::SqliteAdapter;
    use alphapool_analyzer::ports::market_data_port::MarketKey;
    use alphapool_analyzer::ports::result_port::ResultPort;

    fn seeded() -> Arc<SqliteAdapter> {
        let db = SqliteAdapter::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db.insert_positions(&continuous_positions()).unwrap();
        let market = continuous_market();
        for (name, bars) in &market.data {
            db.insert_bars(&MarketKey::new("binance_future", name, 300), bars)
                .unwrap();
        }
        Arc::new(db)
    }

    #[test]
    fn rerunning_a_job_reproduces_the_window() {
        let db = seeded();
        let mut config = continuous_config();
        config.window = UpdateWindow::Trailing {
            update_span: Duration::days(1),
            fetch_lookback: Duration::days(1),
        };

        run_job(&config, ts(0, 17), &*db, db.clone(), &*db).unwrap();
        let positions = db.analyzer_positions(None).unwrap();
        let returns = db.analyzer_returns(None).unwrap();

        run_job(&config, ts(0, 17), &*db, db.clone(), &*db).unwrap();
        assert_eq!(db.analyzer_positions(None).unwrap(), positions);
        assert_eq!(db.analyzer_returns(None).unwrap(), returns);

        assert_eq!(returns.len(), 6);
        let a_at_5 = returns
            .iter()
            .find(|r| r.timestamp == ts(0, 5) && r.model_id == "a")
            .unwrap();
        assert_relative_eq!(a_at_5.ret, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn incremental_run_after_first_run_keeps_history() {
        let db = seeded();
        let config = continuous_config();

        run_job(&config, ts(0, 17), &*db, db.clone(), &*db).unwrap();
        assert_eq!(db.last_position_time(None).unwrap(), Some(ts(0, 15)));

        run_job(&config, ts(0, 22), &*db, db.clone(), &*db).unwrap();
        let returns = db.analyzer_returns(None).unwrap();
        assert!(returns.iter().any(|r| r.timestamp == ts(0, 0)));
        assert_eq!(db.last_position_time(None).unwrap(), Some(ts(0, 20)));
    }
}
