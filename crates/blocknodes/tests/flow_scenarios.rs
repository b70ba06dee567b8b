use async_trait::async_trait;
use blockcore::{
    Block, BlockContext, BlockError, BlockGroup, BlockInfo, BlockLogger, ConfigError,
    DefinitionError, EventBus, Flow, FlowError, Message, NodeSpec, Properties, Value,
};
use blocknodes::{builtin_registry, DebugBlock, InjectBlock, MathBlock, Operation};
use blockruntime::{BlockFactory, EngineConfig, FlowExecutor};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

type Recorded = Arc<Mutex<Vec<Message>>>;

struct Recorder {
    sink: Recorded,
}

#[async_trait]
impl Block for Recorder {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("recorder", "Recorder", BlockGroup::Action)
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        _properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        self.sink.lock().unwrap().push(ctx.require_message()?.clone());
        Ok(Vec::new())
    }
}

struct RecorderFactory(Recorded);

impl BlockFactory for RecorderFactory {
    fn block_type(&self) -> &str {
        "recorder"
    }

    fn info(&self) -> BlockInfo {
        BlockInfo::new("recorder", "Recorder", BlockGroup::Action)
    }

    fn create(&self) -> Result<Box<dyn Block>, BlockError> {
        Ok(Box::new(Recorder {
            sink: Arc::clone(&self.0),
        }))
    }
}

fn executor() -> (FlowExecutor, Recorded) {
    let registry = builtin_registry();
    let sink: Recorded = Arc::new(Mutex::new(Vec::new()));
    registry.register(Arc::new(RecorderFactory(Arc::clone(&sink))));
    let executor = FlowExecutor::new(
        Arc::new(registry),
        Arc::new(EventBus::default()),
        EngineConfig::default(),
    );
    (executor, sink)
}

async fn wait_for(sink: &Recorded, count: usize) -> Vec<Message> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let seen = sink.lock().unwrap().clone();
        if seen.len() >= count || tokio::time::Instant::now() >= deadline {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn math_flow() -> Flow {
    let mut flow = Flow::new("math").with_id("math");
    flow.add_node(
        NodeSpec::new("inject", "inject")
            .with_property("payload", 5.0)
            .with_property("interval", 0.0)
            .with_property("topic", "numbers"),
    );
    flow.add_node(NodeSpec::new("add", "add").with_property("value", 3.0));
    flow.add_node(NodeSpec::new("multiply", "multiply").with_property("value", 2.0));
    flow.add_node(NodeSpec::new("out", "recorder"));
    flow.connect("inject", 0, "add", 0);
    flow.connect("add", 0, "multiply", 0);
    flow.connect("multiply", 0, "out", 0);
    flow
}

#[tokio::test]
async fn test_inject_add_multiply_chain() {
    init_tracing();
    let (executor, sink) = executor();
    executor.prepare_and_start(&math_flow()).await.unwrap();

    assert_eq!(executor.trigger("math", None).await.unwrap(), 1);
    let seen = wait_for(&sink, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sink.lock().unwrap().len(), 1);
    assert_eq!(seen[0].payload, Value::from(16.0));
    assert_eq!(seen[0].topic.as_deref(), Some("numbers"));
    assert_eq!(seen[0].source.as_deref(), Some("multiply"));
    assert_eq!(seen[0].target.as_deref(), Some("out"));

    executor.stop("math").await.unwrap();
}

#[tokio::test]
async fn test_trigger_payload_override() {
    let (executor, sink) = executor();
    executor.prepare_and_start(&math_flow()).await.unwrap();

    executor.trigger("math", Some(Value::from(10.0))).await.unwrap();
    let seen = wait_for(&sink, 1).await;
    assert_eq!(seen[0].payload, Value::from(26.0));

    executor.stop("math").await.unwrap();
}

#[tokio::test]
async fn test_fan_out_delivers_independent_copies() {
    let (executor, sink) = executor();
    let mut flow = Flow::new("fan").with_id("fan");
    flow.add_node(
        NodeSpec::new("inject", "inject")
            .with_property("payload", 1.0)
            .with_property("interval", 0.0),
    );
    flow.add_node(NodeSpec::new("left", "recorder"));
    flow.add_node(NodeSpec::new("right", "recorder"));
    flow.connect("inject", 0, "left", 0);
    flow.connect("inject", 0, "right", 0);

    executor.prepare_and_start(&flow).await.unwrap();
    executor.trigger("fan", None).await.unwrap();

    let seen = wait_for(&sink, 2).await;
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].id, seen[1].id);
    let mut targets: Vec<_> = seen.iter().filter_map(|m| m.target.clone()).collect();
    targets.sort();
    assert_eq!(targets, vec!["left".to_string(), "right".to_string()]);

    executor.stop("fan").await.unwrap();
}

#[tokio::test]
async fn test_divide_by_zero_rejected_at_validate() {
    let (executor, _) = executor();
    let mut flow = Flow::new("div").with_id("div");
    flow.add_node(NodeSpec::new("inject", "inject").with_property("payload", 1.0));
    flow.add_node(NodeSpec::new("div", "divide").with_property("value", 0.0));
    flow.connect("inject", 0, "div", 0);

    match executor.validate(&flow) {
        Err(FlowError::Definition(DefinitionError::Configuration { node, source })) => {
            assert_eq!(node, "div");
            assert_eq!(source.property(), "value");
        }
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_with_delay_in_flight() {
    let (executor, sink) = executor();
    let mut flow = Flow::new("slow").with_id("slow");
    flow.add_node(
        NodeSpec::new("inject", "inject")
            .with_property("payload", 1.0)
            .with_property("interval", 0.0),
    );
    flow.add_node(NodeSpec::new("wait", "delay").with_property("delay_ms", 10_000.0));
    flow.add_node(NodeSpec::new("out", "recorder"));
    flow.connect("inject", 0, "wait", 0);
    flow.connect("wait", 0, "out", 0);

    executor.prepare_and_start(&flow).await.unwrap();
    executor.trigger("slow", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), executor.stop("slow"))
        .await
        .expect("stop should return while a delay is pending")
        .unwrap();
    assert!(sink.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_inject_payload_types() {
    let mut inject = InjectBlock;
    let ctx = || BlockContext::new("i", "f", BlockLogger::detached("f", "i"));

    let mut props = Properties::new();
    props.insert("payload".to_string(), Value::from("true"));
    props.insert("payloadType".to_string(), Value::from("boolean"));
    let out = inject.execute(ctx(), &props).await.unwrap();
    assert_eq!(out[0].payload, Value::Bool(true));

    props.insert("payload".to_string(), Value::from(7.0));
    props.insert("payloadType".to_string(), Value::from("string"));
    let out = inject.execute(ctx(), &props).await.unwrap();
    assert_eq!(out[0].payload, Value::from("7"));

    props.insert("payload".to_string(), Value::from("seven"));
    props.insert("payloadType".to_string(), Value::from("number"));
    assert!(inject.validate(&props).is_err());
    assert!(matches!(
        inject.execute(ctx(), &props).await,
        Err(BlockError::InvalidPayload { .. })
    ));
}

#[tokio::test]
async fn test_math_rejects_non_numeric_payload() {
    let mut add = MathBlock::new(Operation::Add);
    let mut props = Properties::new();
    props.insert("value".to_string(), Value::from(1.0));

    let ctx = BlockContext::new("a", "f", BlockLogger::detached("f", "a"))
        .with_message(Message::new("text"));
    assert!(matches!(
        add.execute(ctx, &props).await,
        Err(BlockError::InvalidPayload { .. })
    ));

    assert_eq!(
        add.validate(&Properties::new()),
        Err(ConfigError::MissingProperty("value".to_string()))
    );
}

#[tokio::test]
async fn test_debug_emits_nothing_and_logs() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let mut debug = DebugBlock;
    let mut props = Properties::new();
    props.insert("prefix".to_string(), Value::from("result"));
    props.insert("console".to_string(), Value::from(false));

    let ctx = BlockContext::new("d", "f", bus.logger("f", "d")).with_message(Message::new(16.0));
    let out = debug.execute(ctx, &props).await.unwrap();
    assert!(out.is_empty());

    match events.recv().await.unwrap() {
        blockcore::ExecutionEvent::NodeLog { fields, .. } => {
            assert_eq!(fields.get("output"), Some(&Value::from("16")));
            assert_eq!(fields.get("prefix"), Some(&Value::from("result")));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_builtin_registry_contents() {
    let registry = builtin_registry();
    assert_eq!(
        registry.block_types(),
        vec!["add", "debug", "delay", "divide", "inject", "multiply", "subtract"]
    );
    for info in registry.describe() {
        assert!(info.check_shape().is_ok(), "{} has a bad shape", info.block_type);
    }
    assert_eq!(registry.describe_type("inject").unwrap().group, BlockGroup::Input);
}
