use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use lag_shedder::{
    probe::ManualProbe, BadActor, Decision, Qos, QosConfig, Request, Response, UNKNOWN_KEY,
};

#[derive(Debug, Default, Clone)]
struct Req {
    host: Option<String>,
    addr: Option<String>,
}

impl Req {
    fn with_host(host: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            addr: None,
        }
    }

    fn with_addr(addr: &str) -> Self {
        Self {
            host: None,
            addr: Some(addr.to_string()),
        }
    }

    fn new(host: &str, addr: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            addr: Some(addr.to_string()),
        }
    }
}

impl Request for Req {
    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
    fn remote_addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }
}

#[derive(Debug, Default)]
struct Res {
    write_head: Vec<u16>,
    end: usize,
}

impl Response for Res {
    fn write_head(&mut self, status: u16) {
        self.write_head.push(status);
    }
    fn end(&mut self) {
        self.end += 1;
    }
}

fn setup(config: QosConfig) -> (Arc<Qos>, Arc<ManualProbe>) {
    let probe = Arc::new(ManualProbe::new());
    let qos = Arc::new(Qos::new(config, probe.clone()).expect("valid config"));
    (qos, probe)
}

fn overload(probe: &ManualProbe, lag_ms: u64) {
    probe.set_overloaded(true);
    probe.set_lag_ms(lag_ms);
}

mod is_bad_host {
    use super::*;

    #[test]
    fn false_without_history() {
        let (qos, _) = setup(QosConfig::default());

        assert!(!qos.is_bad_host(UNKNOWN_KEY, None));
    }

    #[test]
    fn true_once_enough_history() {
        let (qos, probe) = setup(QosConfig::default().with_min_host_requests(10));
        overload(&probe, 70);

        assert!(!qos.is_bad_host(UNKNOWN_KEY, Some(false)), "insufficient history");
        for _ in 0..9 {
            qos.is_bad_host(UNKNOWN_KEY, Some(true));
        }
        assert!(!qos.is_bad_host(UNKNOWN_KEY, Some(false)), "insufficient history");

        qos.is_bad_host(UNKNOWN_KEY, Some(true));
        assert!(qos.is_bad_host(UNKNOWN_KEY, Some(false)));
    }

    #[test]
    fn strict_threshold_applies_at_max_lag() {
        let (qos, probe) = setup(QosConfig::default().with_min_host_requests(2));

        assert!(!qos.is_bad_host("a", Some(false)), "insufficient history");

        overload(&probe, 70);
        for _ in 0..9 {
            qos.is_bad_host("a", Some(true));
        }
        assert!(qos.is_bad_host("a", Some(false)));

        qos.is_bad_host("b", Some(true));
        assert!(!qos.is_bad_host("b", Some(false)), "0.1 < 0.5");

        probe.set_lag_ms(300);
        assert!(qos.is_bad_host("b", Some(false)), "0.1 > 0.01");
    }

    #[test]
    fn ratio_exactly_at_threshold_is_allowed() {
        let (qos, probe) = setup(QosConfig::default().with_min_host_requests(2));
        overload(&probe, 70);

        qos.is_bad_host("a", Some(true));
        qos.is_bad_host("b", Some(true));

        assert_eq!(qos.metrics().host_ratio("b"), 0.5);
        assert!(!qos.is_bad_host("b", Some(false)));

        probe.set_lag_ms(300);
        assert!(qos.is_bad_host("b", Some(false)));
    }

    #[test]
    fn ratio_exactly_at_strict_threshold_is_allowed() {
        let (qos, probe) = setup(
            QosConfig::default()
                .with_host_thresholds(0.5, 0.1)
                .with_min_host_requests(10),
        );
        overload(&probe, 300);

        for _ in 0..9 {
            qos.is_bad_host("a", Some(true));
        }
        qos.is_bad_host("b", Some(true));

        assert_eq!(qos.metrics().host_ratio("b"), 0.1);
        assert_eq!(qos.metrics().host().threshold(300.0), 0.1);
        assert!(!qos.is_bad_host("b", Some(false)), "0.1 > 0.1 is false");
    }
}

mod is_bad_ip {
    use super::*;

    #[test]
    fn false_without_history() {
        let (qos, _) = setup(QosConfig::default());

        assert!(!qos.is_bad_ip(UNKNOWN_KEY, None));
    }

    #[test]
    fn true_once_enough_history() {
        let (qos, probe) = setup(QosConfig::default().with_min_ip_requests(10));
        overload(&probe, 70);

        assert!(!qos.is_bad_ip(UNKNOWN_KEY, Some(false)), "insufficient history");
        for _ in 0..9 {
            qos.is_bad_ip(UNKNOWN_KEY, Some(true));
        }
        assert!(!qos.is_bad_ip(UNKNOWN_KEY, Some(false)), "insufficient history");

        qos.is_bad_ip(UNKNOWN_KEY, Some(true));
        assert!(qos.is_bad_ip(UNKNOWN_KEY, Some(false)));
    }

    #[test]
    fn strict_threshold_applies_at_max_lag() {
        let (qos, probe) = setup(QosConfig::default().with_min_ip_requests(2));

        assert!(!qos.is_bad_ip("a", Some(false)), "insufficient history");

        overload(&probe, 70);
        for _ in 0..9 {
            qos.is_bad_ip("a", Some(true));
        }
        assert!(qos.is_bad_ip("a", Some(false)));

        qos.is_bad_ip("b", Some(true));
        assert!(!qos.is_bad_ip("b", Some(false)));

        probe.set_lag_ms(300);
        assert!(qos.is_bad_ip("b", Some(false)));
    }
}

mod exempt_local_address {
    use super::*;

    #[test]
    fn local_address_is_never_blocked_by_ip() {
        let (qos, probe) = setup(QosConfig::default().with_min_ip_requests(10));
        assert!(qos.config().exempt_local_address);
        overload(&probe, 70);

        assert!(!qos.is_bad_ip("127.0.0.1", Some(false)), "insufficient history");
        for _ in 0..10 {
            qos.is_bad_ip("127.0.0.1", Some(true));
        }
        assert!(qos.is_bad_ip("127.0.0.1", Some(false)));

        assert_eq!(qos.should_throttle_request(&Req::with_addr("127.0.0.1")), None);
    }

    #[test]
    fn local_address_is_blocked_when_not_exempt() {
        let (qos, probe) = setup(
            QosConfig::default()
                .with_min_ip_requests(10)
                .with_exempt_local_address(false),
        );
        overload(&probe, 70);

        for _ in 0..10 {
            qos.is_bad_ip("127.0.0.1", Some(true));
        }
        assert!(qos.is_bad_ip("127.0.0.1", Some(false)));

        assert_eq!(
            qos.should_throttle_request(&Req::with_addr("127.0.0.1")),
            Some(BadActor::BadIp)
        );
    }

    #[test]
    fn exempt_requests_are_not_recorded_by_ip() {
        let (qos, probe) = setup(QosConfig::default());
        overload(&probe, 70);

        qos.should_throttle_request(&Req::with_addr("192.168.0.10"));

        assert_eq!(qos.metrics().ip().total(), 0);
        assert_eq!(qos.metrics().host().total(), 1);
    }
}

mod should_throttle_request {
    use super::*;

    #[test]
    fn user_lag_throttles_regardless_of_history() {
        let (qos, probe) = setup(
            QosConfig::default()
                .with_min_ip_requests(10)
                .with_user_lag(450)
                .with_exempt_local_address(false),
        );
        overload(&probe, 70);

        assert_eq!(qos.should_throttle_request(&Req::with_host("a")), None);

        probe.set_lag_ms(450);
        assert_eq!(
            qos.should_throttle_request(&Req::with_host("a")),
            Some(BadActor::UserLag)
        );
        assert_eq!(
            qos.should_throttle_request(&Req::with_addr("127.0.0.1")),
            Some(BadActor::UserLag),
            "local addresses aren't exempt from user lag"
        );
    }

    #[test]
    fn nothing_happens_while_healthy() {
        let (qos, probe) = setup(QosConfig::default().with_min_host_requests(0));
        probe.set_lag_ms(10_000);

        for _ in 0..1000 {
            assert_eq!(qos.should_throttle_request(&Req::with_host("busy")), None);
        }
        assert_eq!(qos.metrics().host().total(), 0);
    }

    #[test]
    fn busy_but_healthy_traffic_is_not_penalised() {
        let (qos, probe) = setup(QosConfig::default());

        for _ in 0..1000 {
            qos.should_throttle_request(&Req::with_host("busy"));
        }

        overload(&probe, 70);
        for i in 0..20 {
            let host = format!("host-{}", i % 10);
            let addr = format!("198.51.100.{}", i % 10);
            assert_eq!(qos.should_throttle_request(&Req::new(&host, &addr)), None);
        }
        assert_eq!(
            qos.should_throttle_request(&Req::new("busy", "198.51.100.99")),
            None
        );
        assert_eq!(qos.metrics().host().count("busy"), 1);
    }

    #[test]
    fn history_is_bounded() {
        let (qos, probe) = setup(QosConfig::default().with_history_size(50));
        overload(&probe, 70);

        let mut rng = SmallRng::seed_from_u64(7);
        for calls in 1..=200_usize {
            let key = format!("host-{}", rng.gen_range(0..8));
            qos.is_bad_host(&key, Some(true));

            let host = qos.metrics().host();
            let sum: usize = (0..8).map(|i| host.count(&format!("host-{i}"))).sum();
            assert_eq!(host.total(), calls.min(50));
            assert_eq!(sum, host.total());
        }
        assert_eq!(qos.metrics().history_size(), 50);
    }

    #[test]
    fn shared_between_threads() {
        let (qos, probe) = setup(QosConfig::default().with_history_size(100));
        overload(&probe, 70);

        let throttled = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let qos = Arc::clone(&qos);
                let throttled = Arc::clone(&throttled);
                thread::spawn(move || {
                    for i in 0..500 {
                        let req = Req {
                            host: Some(format!("host-{}", (t + i) % 20)),
                            addr: Some(format!("203.0.113.{}", i % 20)),
                        };
                        if qos.should_throttle_request(&req).is_some() {
                            throttled.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(qos.metrics().host().total(), 100);
        assert_eq!(qos.metrics().ip().total(), 100);
        assert_eq!(
            throttled.load(Ordering::SeqCst),
            0,
            "evenly spread traffic is never throttled"
        );
    }
}

mod middleware {
    use super::*;

    #[test]
    fn not_overloaded_calls_next() {
        let (qos, _) = setup(QosConfig::default());
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let middleware = qos.middleware::<Req>().with_before_throttle({
            let hook_calls = Arc::clone(&hook_calls);
            move |_, _, _| {
                hook_calls.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        let mut res = Res::default();
        let mut next = 0;
        let decision = middleware.handle(&Req::default(), &mut res, || next += 1);

        assert_eq!(decision, Decision::Allowed);
        assert_eq!(next, 1);
        assert!(res.write_head.is_empty());
        assert_eq!(res.end, 0);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn throttled_when_overloaded_by_host() {
        let (qos, probe) = setup(QosConfig::default().with_min_host_requests(10));
        let middleware = qos.middleware::<Req>();

        assert_eq!(qos.metrics().host_ratio(UNKNOWN_KEY), 0.0);
        for _ in 0..10 {
            qos.is_bad_host(UNKNOWN_KEY, Some(true));
        }
        overload(&probe, 70);
        assert_eq!(qos.metrics().host_ratio(UNKNOWN_KEY), 1.0);

        let mut res = Res::default();
        let mut next = 0;
        let decision = middleware.handle(&Req::default(), &mut res, || next += 1);

        assert_eq!(decision, Decision::Throttled(BadActor::BadHost));
        assert!(qos.is_bad_host(UNKNOWN_KEY, Some(false)));
        assert_eq!(res.write_head, vec![503]);
        assert_eq!(res.end, 1);
        assert_eq!(next, 0);
    }

    #[test]
    fn throttled_when_overloaded_by_ip() {
        let (qos, probe) = setup(QosConfig::default().with_min_ip_requests(10));
        let middleware = qos.middleware::<Req>();

        assert_eq!(qos.metrics().ip_ratio(UNKNOWN_KEY), 0.0);
        for _ in 0..10 {
            qos.is_bad_ip(UNKNOWN_KEY, Some(true));
        }
        overload(&probe, 70);
        assert_eq!(qos.metrics().ip_ratio(UNKNOWN_KEY), 1.0);

        let mut res = Res::default();
        let decision = middleware.handle(&Req::default(), &mut res, || {});

        assert_eq!(decision, Decision::Throttled(BadActor::BadIp));
        assert!(qos.is_bad_ip(UNKNOWN_KEY, Some(false)));
        assert_eq!(res.write_head, vec![503]);
        assert_eq!(res.end, 1);
    }

    #[test]
    fn hook_allows_throttle() {
        let (qos, probe) = setup(QosConfig::default().with_min_host_requests(10));
        let seen = Arc::new(hook::Seen::default());
        let middleware = qos.middleware::<Req>().with_before_throttle({
            let seen = Arc::clone(&seen);
            move |engine, req, cause| {
                seen.record(engine, req, cause);
                true
            }
        });

        for _ in 0..10 {
            qos.is_bad_host(UNKNOWN_KEY, Some(true));
        }
        overload(&probe, 70);

        let mut res = Res::default();
        let mut next = 0;
        let decision = middleware.handle(&Req::default(), &mut res, || next += 1);

        assert_eq!(decision, Decision::Throttled(BadActor::BadHost));
        assert_eq!(seen.calls(), vec![BadActor::BadHost]);
        assert!(seen.same_engine(&qos));
        assert_eq!(res.write_head, vec![503]);
        assert_eq!(res.end, 1);
        assert_eq!(next, 0);
    }

    #[test]
    fn hook_vetoes_throttle() {
        let (qos, probe) = setup(QosConfig::default().with_min_host_requests(10));
        let middleware = qos
            .middleware::<Req>()
            .with_before_throttle(|_, _, cause| {
                assert_eq!(cause, BadActor::BadHost);
                false
            });

        for _ in 0..10 {
            qos.is_bad_host(UNKNOWN_KEY, Some(true));
        }
        overload(&probe, 70);

        let mut res = Res::default();
        let mut next = 0;
        let decision = middleware.handle(&Req::default(), &mut res, || next += 1);

        assert_eq!(decision, Decision::Spared(BadActor::BadHost));
        assert!(res.write_head.is_empty());
        assert_eq!(res.end, 0);
        assert_eq!(next, 1);
    }

    #[test]
    fn custom_error_status() {
        let (qos, probe) = setup(
            QosConfig::default()
                .with_user_lag(100)
                .with_error_status_code(500),
        );
        overload(&probe, 100);

        let mut res = Res::default();
        let decision = qos
            .middleware::<Req>()
            .handle(&Req::with_host("a"), &mut res, || {});

        assert_eq!(decision, Decision::Throttled(BadActor::UserLag));
        assert_eq!(res.write_head, vec![500]);
    }

    /// Records what a hook was called with.
    mod hook {
        use std::sync::Mutex;

        use lag_shedder::{BadActor, Qos};

        use crate::Req;

        #[derive(Default)]
        pub(super) struct Seen {
            calls: Mutex<Vec<(usize, BadActor)>>,
        }

        impl Seen {
            pub(super) fn record(&self, engine: &Qos, _req: &Req, cause: BadActor) {
                let addr = engine as *const Qos as usize;
                self.calls.lock().unwrap().push((addr, cause));
            }

            pub(super) fn calls(&self) -> Vec<BadActor> {
                self.calls.lock().unwrap().iter().map(|(_, c)| *c).collect()
            }

            pub(super) fn same_engine(&self, qos: &Qos) -> bool {
                let addr = qos as *const Qos as usize;
                self.calls.lock().unwrap().iter().all(|(a, _)| *a == addr)
            }
        }
    }
}
