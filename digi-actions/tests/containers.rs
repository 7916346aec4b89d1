#![allow(clippy::float_cmp)]
use approx::assert_relative_eq;
use digi_actions::{
    Action, ActionRegistry, ContainerCombine, ContainerSelection, ExponentialAttenuator, Gain,
    Pipeline, PipelineConfig, SegmentationSplitter, SignalProcessor, SignalProcessorSequence,
    Threshold,
};
use digi_core::{
    BitFieldCoder, EnergyDeposit, EventContext, EventStore, Hit, HitContainer, RawHit, Readout,
    ReadoutGeometry, Signal,
};

fn raw(ids: &[u64]) -> Vec<RawHit> {
    ids.iter()
        .map(|&id| RawHit::new(id, 1.0, 0.0, 0.0))
        .collect()
}

fn named(list: &[&str]) -> ContainerSelection {
    ContainerSelection::Named(list.iter().map(|s| (*s).to_string()).collect())
}

fn cells(store: &EventStore, name: &str) -> Vec<u64> {
    store
        .with_container("test", name, HitContainer::cell_ids)
        .unwrap()
}

fn abc() -> EventStore {
    EventStore::with_containers(
        EventContext::new(1, 0),
        [
            HitContainer::new("a", raw(&[1, 2])),
            HitContainer::new("b", raw(&[3])),
            HitContainer::new("c", raw(&[4, 5, 6])),
        ],
    )
    .unwrap()
}

fn run(action: &dyn Action, store: &EventStore) {
    action.execute(store.context(), store).unwrap();
}

#[test]
fn test_combine_is_associative() {
    let flat = abc();
    run(
        &ContainerCombine::new("all", named(&["a", "b", "c"]), "out").unwrap(),
        &flat,
    );

    let left = abc();
    run(&ContainerCombine::new("ab", named(&["a", "b"]), "ab").unwrap(), &left);
    run(&ContainerCombine::new("ab_c", named(&["ab", "c"]), "out").unwrap(), &left);

    let right = abc();
    run(&ContainerCombine::new("bc", named(&["b", "c"]), "bc").unwrap(), &right);
    run(&ContainerCombine::new("a_bc", named(&["a", "bc"]), "out").unwrap(), &right);

    assert_eq!(cells(&flat, "out"), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(cells(&left, "out"), cells(&flat, "out"));
    assert_eq!(cells(&right, "out"), cells(&flat, "out"));
}

#[test]
fn test_combine_with_empty_input() {
    let store = EventStore::with_containers(
        EventContext::new(1, 0),
        [
            HitContainer::new("a", raw(&[1])),
            HitContainer::new("empty", raw(&[])),
        ],
    )
    .unwrap();
    run(
        &ContainerCombine::new("merge", named(&["empty", "a"]), "out").unwrap(),
        &store,
    );
    assert_eq!(cells(&store, "out"), vec![1]);
}

#[test]
fn test_split_then_combine_preserves_records() {
    let coder = BitFieldCoder::parse("system:4,module:12,cell:16").unwrap();
    let geometry = ReadoutGeometry::new().with_readout(
        "trk",
        Readout::new("TrackerHits", coder.clone(), Some("module".into())).unwrap(),
    );
    let ids: Vec<u64> = (0..50i64)
        .map(|i| {
            coder
                .encode(&[("system", 3), ("module", (i * 7) % 11), ("cell", i)])
                .unwrap()
        })
        .collect();
    let store = EventStore::with_containers(
        EventContext::new(1, 0),
        [HitContainer::new("trk.hits", raw(&ids))],
    )
    .unwrap();

    run(
        &SegmentationSplitter::new("split", "trk", "trk.hits", "trk.module", &geometry).unwrap(),
        &store,
    );
    run(
        &ContainerCombine::new(
            "merge",
            ContainerSelection::Prefix("trk.module.".into()),
            "trk.merged",
        )
        .unwrap(),
        &store,
    );

    assert_eq!(store.names_with_prefix("trk.module.").len(), 11);
    let mut original = ids.clone();
    let mut merged = cells(&store, "trk.merged");
    original.sort_unstable();
    merged.sort_unstable();
    assert_eq!(merged, original);
}

#[test]
fn test_split_keeps_relative_order_per_segment() {
    let coder = BitFieldCoder::parse("cell:8,module:8").unwrap();
    let geometry = ReadoutGeometry::new()
        .with_readout("trk", Readout::new("T", coder, Some("module".into())).unwrap());
    let ids = [0x0301, 0x0102, 0x0303, 0x0104, 0x0305];
    let store = EventStore::with_containers(
        EventContext::new(1, 0),
        [HitContainer::new("trk.hits", raw(&ids))],
    )
    .unwrap();
    run(
        &SegmentationSplitter::new("split", "trk", "trk.hits", "trk.m", &geometry).unwrap(),
        &store,
    );
    assert_eq!(cells(&store, "trk.m.3"), vec![0x0301, 0x0303, 0x0305]);
    assert_eq!(cells(&store, "trk.m.1"), vec![0x0102, 0x0104]);
}

#[test]
fn test_processor_composition_matches_nesting() {
    let ctx = EventContext::new(1, 0);
    let att = ExponentialAttenuator::new("att", 20.0, 0.0).unwrap();
    let gain = Gain::new("gain", 4.0).unwrap();
    let cut = Threshold::new("cut", 0.5).unwrap();

    let flat = SignalProcessorSequence::new("flat")
        .with(att.clone())
        .with(gain.clone())
        .with(cut.clone());
    let nested = SignalProcessorSequence::new("outer")
        .with(SignalProcessorSequence::new("inner").with(att.clone()).with(gain.clone()))
        .with(cut.clone());

    for distance in [0.0, 5.0, 30.0, 60.0, 120.0] {
        let signal = Signal::new(9, 1.0, 0.0, distance);
        let by_hand = cut
            .process(&ctx, gain.process(&ctx, att.process(&ctx, signal).unwrap()).unwrap())
            .unwrap();
        assert_eq!(flat.apply(&ctx, signal).unwrap(), by_hand);
        assert_eq!(nested.process(&ctx, signal).unwrap(), by_hand);
    }
}

#[test]
fn test_attenuation_scenario_through_config() {
    let config = PipelineConfig::from_json(
        r#"{
            "workers": 1,
            "root": {"kind": "processor_chain", "name": "attenuate", "params": {
                "containers": {"named": ["hits"]},
                "processors": [{"kind": "exponential_attenuator", "name": "att",
                                "params": {"decay": 10.0, "floor": 0.01, "variable": "distance"}}]
            }}
        }"#,
    )
    .unwrap();
    let pipeline = Pipeline::from_config(&config, &ActionRegistry::with_builtins()).unwrap();

    let store = EventStore::with_containers(
        EventContext::new(1, 0),
        [HitContainer::new(
            "hits",
            vec![
                EnergyDeposit::new(1, [50.0, 0.0, 0.0], 1.0, 0.0),
                EnergyDeposit::new(2, [0.0, 10.0, 0.0], 1.0, 0.0),
            ],
        )],
    )
    .unwrap();
    let outcome = pipeline.process_event(store);
    assert!(outcome.is_ok());

    let amplitudes: Vec<f64> = outcome
        .store
        .with_container("test", "hits", |c| c.records.iter().map(Hit::amplitude).collect())
        .unwrap();
    assert_eq!(amplitudes[0], 0.0);
    assert_relative_eq!(amplitudes[1], (-1.0f64).exp(), epsilon = 1e-12);
}
