use blockcore::property::{resolve_properties, validate_properties};
use blockcore::{
    Block, BlockContext, BlockGroup, BlockInfo, BlockLogger, ConfigError, DefinitionError, EventBus,
    ExecutionEvent, Flow, LogLevel, Message, NodeSpec, PortRole, Properties, PropertyDefinition,
    PropertyType, Value,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

fn props(entries: &[(&str, Value)]) -> Properties {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_fork_is_independent_copy() {
    let mut original = Message::new(5.0)
        .with_topic("numbers")
        .with_header("trace", "abc");
    original.set_context("hops", 1.0);

    let mut fork = original.fork();
    assert_ne!(fork.id, original.id);
    assert_eq!(fork.payload, original.payload);
    assert_eq!(fork.topic.as_deref(), Some("numbers"));
    assert_eq!(fork.header("trace"), Some("abc"));

    fork.set_header("trace", "changed");
    fork.set_context("hops", 2.0);
    fork.payload = Value::from("other");

    assert_eq!(original.header("trace"), Some("abc"));
    assert_eq!(original.context_value("hops"), Some(&Value::Number(1.0)));
    assert_eq!(original.payload, Value::Number(5.0));
}

#[test]
fn test_derive_replaces_payload_only() {
    let original = Message::new(1.0).with_topic("t").with_source("a");
    let derived = original.derive("done");

    assert_eq!(derived.payload, Value::from("done"));
    assert_eq!(derived.topic.as_deref(), Some("t"));
    assert_eq!(derived.source.as_deref(), Some("a"));
    assert_ne!(derived.id, original.id);
}

#[test]
fn test_value_conversions() {
    assert_eq!(Value::from("3.5").to_number(), Some(3.5));
    assert_eq!(Value::from("abc").to_number(), None);
    assert_eq!(Value::from("true").to_boolean(), Some(true));
    assert_eq!(Value::Number(2.0).to_string(), "2");

    let json: Value = serde_json::json!({"a": [1, "x", null]}).into();
    let items = json.as_object().and_then(|o| o.get("a")).and_then(Value::as_array);
    assert_eq!(items.map(<[Value]>::len), Some(3));
}

#[test]
fn test_required_property_missing() {
    let defs = vec![PropertyDefinition::new("value", PropertyType::Number).required()];

    let err = validate_properties(&defs, &Properties::new()).unwrap_err();
    assert_eq!(err, ConfigError::MissingProperty("value".to_string()));

    let err = validate_properties(&defs, &props(&[("value", Value::Null)])).unwrap_err();
    assert_eq!(err.property(), "value");
}

#[test]
fn test_property_type_and_range_checks() {
    let defs = vec![
        PropertyDefinition::new("interval", PropertyType::Number).min(0.0).max(10.0),
        PropertyDefinition::new("enabled", PropertyType::Boolean),
    ];

    assert!(validate_properties(&defs, &props(&[("interval", Value::from("5"))])).is_ok());
    assert!(matches!(
        validate_properties(&defs, &props(&[("interval", Value::from(-1.0))])),
        Err(ConfigError::OutOfRange { .. })
    ));
    assert!(matches!(
        validate_properties(&defs, &props(&[("interval", Value::from(11.0))])),
        Err(ConfigError::OutOfRange { .. })
    ));
    assert!(matches!(
        validate_properties(&defs, &props(&[("enabled", Value::from("maybe"))])),
        Err(ConfigError::InvalidType { .. })
    ));
}

#[test]
fn test_string_pattern_length_and_select() {
    let defs = vec![
        PropertyDefinition::new("code", PropertyType::String)
            .pattern("^[A-Z]{3}$")
            .max_length(3),
        PropertyDefinition::new("mode", PropertyType::Select)
            .option("Fast", "fast")
            .option("Slow", "slow"),
        PropertyDefinition::new("broken", PropertyType::String).pattern("("),
    ];

    assert!(validate_properties(&defs, &props(&[("code", Value::from("ABC"))])).is_ok());
    assert!(matches!(
        validate_properties(&defs, &props(&[("code", Value::from("abc"))])),
        Err(ConfigError::PatternMismatch { .. })
    ));
    assert!(matches!(
        validate_properties(&defs, &props(&[("code", Value::from("ABCD"))])),
        Err(ConfigError::InvalidLength { max: 3, .. })
    ));
    assert!(matches!(
        validate_properties(&defs, &props(&[("mode", Value::from("medium"))])),
        Err(ConfigError::InvalidOption { .. })
    ));
    assert!(matches!(
        validate_properties(&defs, &props(&[("broken", Value::from("x"))])),
        Err(ConfigError::Invalid { .. })
    ));
}

#[test]
fn test_resolve_fills_defaults() {
    let defs = vec![
        PropertyDefinition::new("interval", PropertyType::Number).default_value(1000.0),
        PropertyDefinition::new("topic", PropertyType::String).default_value(""),
    ];
    let resolved = resolve_properties(
        &defs,
        &props(&[("interval", Value::from(0.0)), ("extra", Value::from(true))]),
    );

    assert_eq!(resolved.get("interval"), Some(&Value::Number(0.0)));
    assert_eq!(resolved.get("topic"), Some(&Value::from("")));
    assert_eq!(resolved.get("extra"), Some(&Value::Bool(true)));
}

#[test]
fn test_block_info_shape() {
    let input = BlockInfo::new("inject", "Inject", BlockGroup::Input);
    assert_eq!((input.inputs, input.outputs), (0, 1));
    assert!(input.check_shape().is_ok());

    let bad_action = BlockInfo::new("sink", "Sink", BlockGroup::Action).with_ports(1, 1);
    assert!(bad_action.check_shape().is_err());

    let bad_input = BlockInfo::new("src", "Src", BlockGroup::Input).with_ports(1, 1);
    assert!(bad_input.check_shape().is_err());
}

#[test]
fn test_flow_document_uses_type_key() {
    let json = r#"{
        "id": "flow-1",
        "name": "Example",
        "nodes": [
            {"id": "a", "type": "inject", "properties": {"payload": 5, "interval": 0}},
            {"id": "b", "type": "debug"}
        ],
        "connections": [
            {"id": "c1", "source": "a", "source_port": 0, "target": "b", "target_port": 0}
        ],
        "active": true
    }"#;

    let flow: Flow = serde_json::from_str(json).unwrap();
    assert_eq!(flow.nodes[0].block_type, "inject");
    assert_eq!(flow.nodes[0].properties.get("payload"), Some(&Value::Number(5.0)));
    assert!(flow.active);
    assert_eq!(flow.outgoing("a").count(), 1);

    let encoded = serde_json::to_value(&flow).unwrap();
    assert_eq!(encoded["nodes"][1]["type"], "debug");
}

#[test]
fn test_check_structure() {
    let mut flow = Flow::new("structure");
    flow.add_node(NodeSpec::new("a", "inject"));
    flow.add_node(NodeSpec::new("b", "debug"));
    flow.connect("a", 0, "b", 0);
    assert!(flow.check_structure().is_ok());

    flow.connect("a", 0, "ghost", 0);
    assert!(matches!(
        flow.check_structure(),
        Err(DefinitionError::UnknownNode { role: PortRole::Target, .. })
    ));

    flow.remove_node("b");
    flow.connections.retain(|c| c.target != "ghost");
    assert!(flow.connections.is_empty());

    flow.add_node(NodeSpec::new("a", "debug"));
    assert!(matches!(
        flow.check_structure(),
        Err(DefinitionError::DuplicateNode(id)) if id == "a"
    ));
}

#[tokio::test]
async fn test_block_logger_publishes_node_log() {
    init_tracing();
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let logger = bus.logger("flow-1", "node-1");

    logger.log(LogLevel::Info, "hello", [("count", Value::from(2.0))]);

    match rx.recv().await.unwrap() {
        ExecutionEvent::NodeLog {
            flow_id,
            node_id,
            level,
            message,
            fields,
            ..
        } => {
            assert_eq!(flow_id, "flow-1");
            assert_eq!(node_id, "node-1");
            assert_eq!(level, LogLevel::Info);
            assert_eq!(message, "hello");
            assert_eq!(fields.get("count"), Some(&Value::Number(2.0)));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_context_state_and_message() {
    init_tracing();
    let ctx = BlockContext::new("n", "f", BlockLogger::detached("f", "n"));
    assert!(ctx.require_message().is_err());

    ctx.set_state("count", 1.0).await;
    assert_eq!(ctx.get_state("count").await, Some(Value::Number(1.0)));

    let ctx = ctx.with_message(Message::new("x"));
    assert_eq!(ctx.require_message().unwrap().payload, Value::from("x"));
}

fn assert_send_sync<T: Send + Sync + ?Sized>() {}

#[test]
fn test_block_objects_can_be_shared_across_tasks() {
    // node workers hold their block across awaits inside spawned tasks
    assert_send_sync::<Box<dyn Block>>();
    assert_send_sync::<BlockContext>();
}
