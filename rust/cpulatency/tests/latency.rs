use cpulatency::fake::FakeHost;
use cpulatency::pm::PM_QOS_CPU_LATENCY_DEFAULT_US;
use cpulatency::{Error, LatencyPin, ResumeLatencySupport, Target, TargetSelector};

#[test]
fn specific_cpu_registers_one_cpu_request() {
    let host = FakeHost::new(8);
    let pin = LatencyPin::new(&host);

    for cpu in 0..8 {
        let req = pin.start(TargetSelector::SpecificCore(cpu)).unwrap();
        assert_eq!(req.target(), Target::Cpu(cpu));
        assert_eq!(host.nr_cpu_requests(cpu), 1);
        assert_eq!(host.cpu_latency(cpu), Some(0));
        assert_eq!(host.nr_global_requests(), 0);

        req.stop().unwrap();
        assert_eq!(host.nr_cpu_requests(cpu), 0);
        assert_eq!(host.cpu_latency(cpu), None);
    }
    assert_eq!(host.totals(), (8, 8));
}

#[test]
fn out_of_range_cpu_is_invalid_target() {
    let host = FakeHost::new(4);
    let pin = LatencyPin::new(&host);

    let err = pin.start(TargetSelector::SpecificCore(4)).unwrap_err();
    assert!(matches!(err, Error::InvalidTarget(4)));
    assert_eq!(err.errno(), libc::EINVAL);
    assert_eq!(host.nr_active(), 0);
    assert_eq!(host.totals(), (0, 0));
}

#[test]
fn absent_cpu_is_invalid_target() {
    let host = FakeHost::new(4).without_cpu(2);
    let pin = LatencyPin::new(&host);

    let err = pin.start(TargetSelector::SpecificCore(2)).unwrap_err();
    assert!(matches!(err, Error::InvalidTarget(2)));
    assert_eq!(host.nr_active(), 0);
}

#[test]
fn all_cores_is_reversible() {
    let host = FakeHost::new(4);
    let before = host.global_latency();
    assert_eq!(before, PM_QOS_CPU_LATENCY_DEFAULT_US);

    let pin = LatencyPin::new(&host);
    let req = pin.start(TargetSelector::AllCores).unwrap();
    assert_eq!(req.target(), Target::AllCores);
    assert_eq!(host.global_latency(), 0);
    assert_eq!(host.nr_global_requests(), 1);

    req.stop().unwrap();
    assert_eq!(host.global_latency(), before);
    assert_eq!(host.nr_active(), 0);
}

#[test]
fn auto_isolated_without_isolation_is_all_cores() {
    let host = FakeHost::new(4);
    let pin = LatencyPin::new(&host);

    let req = pin.start(TargetSelector::AutoIsolated).unwrap();
    assert_eq!(req.target(), Target::AllCores);
    assert_eq!(req.selected(), Target::AllCores);
    assert_eq!(host.nr_global_requests(), 1);
    assert_eq!(host.global_latency(), 0);
}

#[test]
fn auto_isolated_matches_lowest_isolated_cpu() {
    let host = FakeHost::new(8).with_isolated(&[5, 3, 7]);
    let pin = LatencyPin::new(&host);

    let auto = pin.start(TargetSelector::AutoIsolated).unwrap();
    assert_eq!(auto.target(), Target::Cpu(3));
    assert_eq!(host.cpu_latency(3), Some(0));
    assert_eq!(host.nr_global_requests(), 0);
    auto.stop().unwrap();

    let explicit = pin.start(TargetSelector::SpecificCore(3)).unwrap();
    assert_eq!(explicit.target(), Target::Cpu(3));
    assert_eq!(host.cpu_latency(3), Some(0));
    explicit.stop().unwrap();
}

#[test]
fn unsupported_per_cpu_falls_back_to_global() {
    let host = FakeHost::new(4).with_support(ResumeLatencySupport::Unsupported);
    let pin = LatencyPin::new(&host);
    assert_eq!(pin.support(), ResumeLatencySupport::Unsupported);

    let req = pin.start(TargetSelector::SpecificCore(1)).unwrap();
    assert_eq!(req.target(), Target::AllCores);
    assert_eq!(req.selected(), Target::Cpu(1));
    assert_eq!(host.nr_cpu_requests(1), 0);
    assert_eq!(host.global_latency(), 0);
    req.stop().unwrap();
    assert_eq!(host.nr_active(), 0);
}

#[test]
fn unsupported_per_cpu_still_rejects_missing_cpu() {
    let host = FakeHost::new(4).with_support(ResumeLatencySupport::Unsupported);
    let pin = LatencyPin::new(&host);

    let err = pin.start(TargetSelector::SpecificCore(9)).unwrap_err();
    assert!(matches!(err, Error::InvalidTarget(9)));
    assert_eq!(host.nr_active(), 0);
}

#[test]
fn refused_request_is_host_error() {
    let host = FakeHost::new(4).refusing_requests();
    let pin = LatencyPin::new(&host);

    let err = pin.start(TargetSelector::AllCores).unwrap_err();
    assert!(matches!(err, Error::Host(_)));
    assert_eq!(host.totals(), (0, 0));
}

#[test]
fn dropped_request_is_released() {
    let host = FakeHost::new(4);
    let pin = LatencyPin::new(&host);
    {
        let _req = pin.start(TargetSelector::SpecificCore(0)).unwrap();
        assert_eq!(host.nr_active(), 1);
    }
    assert_eq!(host.nr_active(), 0);
    assert_eq!(host.totals(), (1, 1));
}

#[test]
fn repeated_cycles_do_not_leak() {
    let host = FakeHost::new(4).with_isolated(&[2]);
    let pin = LatencyPin::new(&host);
    let selectors = [
        TargetSelector::AllCores,
        TargetSelector::AutoIsolated,
        TargetSelector::SpecificCore(1),
    ];

    for i in 0..30 {
        let req = pin.start(selectors[i % selectors.len()]).unwrap();
        assert_eq!(host.nr_active(), 1);
        req.stop().unwrap();
        assert_eq!(host.nr_active(), 0);
    }
    assert_eq!(host.totals(), (30, 30));
    assert_eq!(host.global_latency(), PM_QOS_CPU_LATENCY_DEFAULT_US);
}
