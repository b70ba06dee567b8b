use async_trait::async_trait;
use blockcore::{
    number_property, property::validate_properties, Block, BlockContext, BlockError, BlockGroup,
    BlockInfo, ConfigError, LogLevel, Message, Properties, PropertyDefinition, PropertyType, Value,
};
use blockruntime::BlockFactory;

/// Arithmetic applied by a [`MathBlock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    fn block_type(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }

    fn apply(self, input: f64, operand: f64) -> f64 {
        match self {
            Operation::Add => input + operand,
            Operation::Subtract => input - operand,
            Operation::Multiply => input * operand,
            Operation::Divide => input / operand,
        }
    }
}

/// Applies `payload <op> value` to every numeric message it receives
#[derive(Debug)]
pub struct MathBlock {
    operation: Operation,
}

impl MathBlock {
    pub fn new(operation: Operation) -> Self {
        Self { operation }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }
}

#[async_trait]
impl Block for MathBlock {
    fn info(&self) -> BlockInfo {
        let (name, description, operand) = match self.operation {
            Operation::Add => ("Addition", "Add a number to the input payload", "Second Addend"),
            Operation::Subtract => (
                "Subtraction",
                "Subtract a number from the input payload",
                "Subtracted Value",
            ),
            Operation::Multiply => (
                "Multiplication",
                "Multiply the input payload by a number",
                "Multiplier",
            ),
            Operation::Divide => ("Division", "Divide the input payload by a number", "Divisor"),
        };

        BlockInfo::new(self.operation.block_type(), name, BlockGroup::Propagation)
            .with_description(description)
            .with_category("math")
            .with_icon("calculator", "#2196F3")
            .with_author("blockflow")
            .with_property(
                PropertyDefinition::new("value", PropertyType::Number)
                    .display_name(operand)
                    .required()
                    .default_value(if self.operation == Operation::Divide { 1.0 } else { 0.0 }),
            )
    }

    fn validate(&self, properties: &Properties) -> Result<(), ConfigError> {
        validate_properties(&self.info().properties, properties)?;
        if self.operation == Operation::Divide && number_property(properties, "value")? == 0.0 {
            return Err(ConfigError::Invalid {
                property: "value".to_string(),
                reason: "division by zero".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError> {
        let input = ctx.require_message()?;
        let lhs = input
            .payload
            .as_f64()
            .ok_or_else(|| BlockError::InvalidPayload {
                expected: "number".to_string(),
                actual: input.payload.type_name().to_string(),
            })?;
        let rhs = number_property(properties, "value")?;

        if self.operation == Operation::Divide && rhs == 0.0 {
            return Err(BlockError::ExecutionFailed("division by zero".to_string()));
        }

        let result = self.operation.apply(lhs, rhs);
        ctx.logger.log(
            LogLevel::Debug,
            format!("{} performed", self.operation.block_type()),
            [
                ("input", Value::from(lhs)),
                ("operand", Value::from(rhs)),
                ("result", Value::from(result)),
            ],
        );

        Ok(vec![input.derive(result)])
    }
}

/// Creates [`MathBlock`] instances for one operation
pub struct MathBlockFactory {
    operation: Operation,
    info: BlockInfo,
}

impl MathBlockFactory {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            info: MathBlock::new(operation).info(),
        }
    }
}

impl BlockFactory for MathBlockFactory {
    fn block_type(&self) -> &str {
        self.operation.block_type()
    }

    fn info(&self) -> BlockInfo {
        self.info.clone()
    }

    fn create(&self) -> Result<Box<dyn Block>, BlockError> {
        Ok(Box::new(MathBlock::new(self.operation)))
    }
}
