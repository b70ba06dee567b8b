#![allow(dead_code)]

use async_trait::async_trait;
use blockcore::{
    number_property, Block, BlockContext, BlockError, BlockGroup, BlockInfo, Flow, Message,
    NodeSpec, Properties, PropertyDefinition, PropertyType, Value,
};
use blockruntime::{BlockFactory, BlockRegistry, DefaultFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Input block emitting its `payload` property (default 1)
#[derive(Default)]
pub struct SourceBlock;

#[async_trait]
impl Block for SourceBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("source", "Source", BlockGroup::Input)
            .with_property(PropertyDefinition::new("payload", PropertyType::Json).default_value(1.0))
            .with_property(PropertyDefinition::new("interval", PropertyType::Number).min(0.0))
    }

    async fn execute(
        &mut self,
        _ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let payload = properties.get("payload").cloned().unwrap_or_default();
        Ok(vec![Message::new(payload)])
    }
}

/// Input block that always fails
#[derive(Default)]
pub struct BrokenSourceBlock;

#[async_trait]
impl Block for BrokenSourceBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("broken_source", "Broken Source", BlockGroup::Input)
            .with_property(PropertyDefinition::new("interval", PropertyType::Number))
    }

    async fn execute(
        &mut self,
        _ctx: BlockContext,
        _properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        Err(BlockError::ExecutionFailed("source offline".to_string()))
    }
}

/// Adds `value` (required) to numeric payloads
#[derive(Default)]
pub struct OffsetBlock;

#[async_trait]
impl Block for OffsetBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("offset", "Offset", BlockGroup::Propagation).with_property(
            PropertyDefinition::new("value", PropertyType::Number).required(),
        )
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        let n = input.payload.as_f64().ok_or_else(|| BlockError::InvalidPayload {
            expected: "number".to_string(),
            actual: input.payload.type_name().to_string(),
        })?;
        Ok(vec![input.derive(n + number_property(properties, "value")?)])
    }
}

/// Fails on payloads equal to "fail", passes everything else through
#[derive(Default)]
pub struct PickyBlock;

#[async_trait]
impl Block for PickyBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("picky", "Picky", BlockGroup::Propagation)
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        _properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        if input.payload == Value::from("fail") {
            return Err(BlockError::ExecutionFailed("refused".to_string()));
        }
        Ok(vec![input.fork()])
    }
}

/// Panics on payloads equal to "boom"
#[derive(Default)]
pub struct PanickyBlock;

#[async_trait]
impl Block for PanickyBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("panicky", "Panicky", BlockGroup::Propagation)
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        _properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        if input.payload == Value::from("boom") {
            panic!("boom");
        }
        Ok(vec![input.fork()])
    }
}

/// Sleeps `delay_ms` per message, giving up when the flow stops
#[derive(Default)]
pub struct SlowBlock;

#[async_trait]
impl Block for SlowBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("slow", "Slow", BlockGroup::Propagation).with_property(
            PropertyDefinition::new("delay_ms", PropertyType::Number).default_value(200.0),
        )
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        let delay = Duration::from_millis(number_property(properties, "delay_ms")? as u64);
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(BlockError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(vec![input.fork()]),
        }
    }
}

/// Action block that returns output anyway
#[derive(Default)]
pub struct ChattyActionBlock;

#[async_trait]
impl Block for ChattyActionBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("chatty", "Chatty", BlockGroup::Action)
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        _properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        Ok(vec![input.fork(), input.fork()])
    }
}

/// Action block that sleeps `hold_ms` and ignores cancellation
#[derive(Default)]
pub struct StubbornBlock;

#[async_trait]
impl Block for StubbornBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("stubborn", "Stubborn", BlockGroup::Action).with_property(
            PropertyDefinition::new("hold_ms", PropertyType::Number).default_value(1500.0),
        )
    }

    async fn execute(
        &mut self,
        _ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let hold = Duration::from_millis(number_property(properties, "hold_ms")? as u64);
        tokio::time::sleep(hold).await;
        Ok(Vec::new())
    }
}

/// How often the "counted" factory and its blocks were exercised
#[derive(Default)]
pub struct Tally {
    pub created: AtomicUsize,
    pub initialized: AtomicUsize,
    pub shut_down: AtomicUsize,
}

impl Tally {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn shut_down(&self) -> usize {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Pass-through block reporting its lifecycle hooks to a [`Tally`]
pub struct CountedBlock {
    tally: Arc<Tally>,
}

#[async_trait]
impl Block for CountedBlock {
    fn info(&self) -> BlockInfo {
        counted_info()
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        _properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        Ok(vec![ctx.require_message()?.fork()])
    }

    async fn initialize(&mut self) -> Result<(), BlockError> {
        self.tally.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BlockError> {
        self.tally.shut_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counted_info() -> BlockInfo {
    BlockInfo::new("counted", "Counted", BlockGroup::Propagation)
}

pub struct CountedFactory {
    pub tally: Arc<Tally>,
}

impl BlockFactory for CountedFactory {
    fn block_type(&self) -> &str {
        "counted"
    }

    fn info(&self) -> BlockInfo {
        counted_info()
    }

    fn create(&self) -> Result<Box<dyn Block>, BlockError> {
        self.tally.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedBlock {
            tally: Arc::clone(&self.tally),
        }))
    }
}

/// Shared list of payloads seen by recorder nodes
pub type Recorded = Arc<Mutex<Vec<Value>>>;

/// Action block appending every payload to a shared list
pub struct RecorderBlock {
    sink: Recorded,
}

#[async_trait]
impl Block for RecorderBlock {
    fn info(&self) -> BlockInfo {
        recorder_info()
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        _properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        self.sink.lock().unwrap().push(input.payload.clone());
        Ok(Vec::new())
    }
}

fn recorder_info() -> BlockInfo {
    BlockInfo::new("recorder", "Recorder", BlockGroup::Action)
}

pub struct RecorderFactory {
    sink: Recorded,
}

impl BlockFactory for RecorderFactory {
    fn block_type(&self) -> &str {
        "recorder"
    }

    fn info(&self) -> BlockInfo {
        recorder_info()
    }

    fn create(&self) -> Result<Box<dyn Block>, BlockError> {
        Ok(Box::new(RecorderBlock {
            sink: Arc::clone(&self.sink),
        }))
    }
}

/// Registry with every test block; returns the recorder's sink
pub fn test_registry() -> (Arc<BlockRegistry>, Recorded) {
    let registry = BlockRegistry::new();
    let sink: Recorded = Arc::new(Mutex::new(Vec::new()));

    registry.register(Arc::new(DefaultFactory::<SourceBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<BrokenSourceBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<OffsetBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<PickyBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<PanickyBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<SlowBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<ChattyActionBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<StubbornBlock>::new()));
    registry.register(Arc::new(RecorderFactory {
        sink: Arc::clone(&sink),
    }));

    (Arc::new(registry), sink)
}

/// `source(interval 0) -> <middle...> -> recorder`
pub fn chain(id: &str, middle: &[NodeSpec]) -> Flow {
    let mut flow = Flow::new(id).with_id(id);
    let mut previous = flow.add_node(NodeSpec::new("src", "source").with_property("interval", 0.0));
    for node in middle {
        let next = flow.add_node(node.clone());
        flow.connect(previous, 0, next.clone(), 0);
        previous = next;
    }
    let sink = flow.add_node(NodeSpec::new("sink", "recorder"));
    flow.connect(previous, 0, sink, 0);
    flow
}

/// Wait until `sink` holds at least `count` payloads
pub async fn wait_for(sink: &Recorded, count: usize) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let seen = sink.lock().unwrap().clone();
        if seen.len() >= count || tokio::time::Instant::now() >= deadline {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
