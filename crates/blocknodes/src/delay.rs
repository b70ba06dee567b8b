use async_trait::async_trait;
use blockcore::{
    number_property, Block, BlockContext, BlockError, BlockGroup, BlockInfo, Message, Properties,
    PropertyDefinition, PropertyType,
};
use tokio::time::{sleep, Duration};

/// Holds each message for a fixed time before passing it on
#[derive(Debug, Default)]
pub struct DelayBlock;

#[async_trait]
impl Block for DelayBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("delay", "Delay", BlockGroup::Propagation)
            .with_description("Delay each message by a number of milliseconds")
            .with_category("time")
            .with_icon("clock", "#9C27B0")
            .with_author("blockflow")
            .with_property(
                PropertyDefinition::new("delay_ms", PropertyType::Number)
                    .display_name("Delay (ms)")
                    .default_value(1000.0)
                    .min(0.0),
            )
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        let delay_ms = number_property(properties, "delay_ms")?.max(0.0) as u64;

        ctx.logger.debug(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(BlockError::Cancelled),
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(vec![input.fork()]),
        }
    }
}
