use async_trait::async_trait;
use blockcore::{
    string_property, Block, BlockContext, BlockError, BlockGroup, BlockInfo, LogLevel, Message,
    Properties, PropertyDefinition, PropertyType, Value,
};

/// Writes every message it receives to the log
#[derive(Debug, Default)]
pub struct DebugBlock;

#[async_trait]
impl Block for DebugBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("debug", "Debug", BlockGroup::Action)
            .with_description("Output debug information to console or log")
            .with_category("output")
            .with_icon("bug", "#FF9800")
            .with_author("blockflow")
            .with_property(
                PropertyDefinition::new("console", PropertyType::Boolean)
                    .display_name("Console Output")
                    .description("Also print to the process log at info level")
                    .default_value(true),
            )
            .with_property(
                PropertyDefinition::new("complete", PropertyType::Select)
                    .display_name("Output")
                    .default_value("payload")
                    .option("Payload only", "payload")
                    .option("Complete message", "complete"),
            )
            .with_property(
                PropertyDefinition::new("prefix", PropertyType::String)
                    .display_name("Prefix")
                    .default_value(""),
            )
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let message = ctx.require_message()?;

        let console = properties
            .get("console")
            .and_then(Value::to_boolean)
            .unwrap_or(true);
        let prefix = string_property(properties, "prefix").unwrap_or_default();
        let output = match string_property(properties, "complete") {
            Some("complete") => serde_json::to_string(message)
                .map_err(|e| BlockError::ExecutionFailed(format!("failed to encode message: {}", e)))?,
            _ => message.payload.to_string(),
        };

        let label = if prefix.is_empty() { "Debug" } else { prefix };
        if console {
            tracing::info!(node_id = %ctx.node_id, "[{}] {}: {}", ctx.node_id, label, output);
        }

        ctx.logger.log(
            LogLevel::Debug,
            "Debug block output",
            [
                ("prefix", Value::from(prefix)),
                ("output", Value::from(output)),
                (
                    "topic",
                    message.topic.clone().map(Value::from).unwrap_or_default(),
                ),
            ],
        );

        Ok(Vec::new())
    }
}
