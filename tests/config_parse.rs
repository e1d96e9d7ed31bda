use coverwatch::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../coverwatch.example.json");
    let cfg: Config = serde_json::from_str(raw).expect("parse JSON");
    assert_eq!(cfg.server.port, 5000);
    assert_eq!(cfg.server.max_batch_size, 16);
    assert_eq!(cfg.detector.target_class, "missing_cover");
    assert_eq!(cfg.vlm.max_retries, 3);
    assert!(cfg.prompt.contains("cover missing"));
}

#[test]
fn example_config_matches_built_in_defaults() {
    let raw = include_str!("../coverwatch.example.json");
    let cfg: Config = serde_json::from_str(raw).expect("parse JSON");
    let example = serde_json::to_value(&cfg).expect("serialize parsed config");
    let defaults = serde_json::to_value(Config::default()).expect("serialize defaults");
    assert_eq!(example, defaults, "example file drifted from the defaults");
}

#[test]
fn empty_object_yields_full_defaults() {
    let cfg: Config = serde_json::from_str("{}").expect("empty config should parse");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.vlm.model, "qwen2.5-vl-7b-instruct");
    assert_eq!(cfg.detector.confidence_threshold, 0.25);
    assert!(!cfg.logging.json);
}
