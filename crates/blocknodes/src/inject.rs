use async_trait::async_trait;
use blockcore::{
    string_property, Block, BlockContext, BlockError, BlockGroup, BlockInfo, ConfigError, LogLevel,
    Message, Properties, PropertyDefinition, PropertyType, Value,
};

/// Emits a configured payload on a timer or when triggered by hand
#[derive(Debug, Default)]
pub struct InjectBlock;

impl InjectBlock {
    fn payload(properties: &Properties) -> Result<Value, BlockError> {
        let raw = properties.get("payload").cloned().unwrap_or_default();
        let payload_type = string_property(properties, "payloadType").unwrap_or("number");

        let converted = match payload_type {
            "number" => raw.to_number().map(Value::Number),
            "boolean" => raw.to_boolean().map(Value::Bool),
            _ => Some(match &raw {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            }),
        };

        converted.ok_or_else(|| BlockError::InvalidPayload {
            expected: payload_type.to_string(),
            actual: raw.to_string(),
        })
    }
}

#[async_trait]
impl Block for InjectBlock {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("inject", "Inject", BlockGroup::Input)
            .with_description("Trigger the flow with a configurable payload")
            .with_category("input")
            .with_icon("play-circle", "#4CAF50")
            .with_author("blockflow")
            .with_property(
                PropertyDefinition::new("payload", PropertyType::Json)
                    .display_name("Output Value")
                    .description("The value to inject, converted according to the payload type")
                    .required()
                    .default_value("0"),
            )
            .with_property(
                PropertyDefinition::new("interval", PropertyType::Number)
                    .display_name("Interval (ms)")
                    .description("Publishing interval in milliseconds (0 = manual trigger only)")
                    .default_value(1000.0)
                    .min(0.0),
            )
            .with_property(
                PropertyDefinition::new("topic", PropertyType::String)
                    .display_name("Topic")
                    .description("Optional topic for the message")
                    .default_value(""),
            )
            .with_property(
                PropertyDefinition::new("payloadType", PropertyType::Select)
                    .display_name("Payload Type")
                    .default_value("number")
                    .option("Number", "number")
                    .option("String", "string")
                    .option("Boolean", "boolean"),
            )
    }

    fn validate(&self, properties: &Properties) -> Result<(), ConfigError> {
        blockcore::property::validate_properties(&self.info().properties, properties)?;
        let resolved = blockcore::property::resolve_properties(&self.info().properties, properties);
        Self::payload(&resolved).map_err(|e| ConfigError::Invalid {
            property: "payload".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let payload = Self::payload(properties)?;
        let mut message = Message::new(payload.clone());
        if let Some(topic) = string_property(properties, "topic").filter(|t| !t.is_empty()) {
            message.topic = Some(topic.to_string());
        }

        ctx.logger.log(
            LogLevel::Debug,
            "Inject block executed",
            [
                ("payload", payload),
                ("topic", Value::from(message.topic.clone().unwrap_or_default())),
            ],
        );

        Ok(vec![message])
    }
}
