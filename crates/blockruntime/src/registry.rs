use blockcore::{Block, BlockError, BlockInfo, DefinitionError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Factory trait for creating block instances
pub trait BlockFactory: Send + Sync {
    /// Type key this factory registers under (e.g. "inject", "add")
    fn block_type(&self) -> &str;

    /// Metadata of the block type, available without creating an instance
    fn info(&self) -> BlockInfo;

    /// Create a fresh, independent instance
    fn create(&self) -> Result<Box<dyn Block>, BlockError>;
}

/// Factory for blocks that can be built with `Default`
pub struct DefaultFactory<B> {
    info: BlockInfo,
    _block: std::marker::PhantomData<fn() -> B>,
}

impl<B> DefaultFactory<B>
where
    B: Block + Default + 'static,
{
    pub fn new() -> Self {
        Self {
            info: B::default().info(),
            _block: std::marker::PhantomData,
        }
    }
}

impl<B> Default for DefaultFactory<B>
where
    B: Block + Default + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<B> BlockFactory for DefaultFactory<B>
where
    B: Block + Default + 'static,
{
    fn block_type(&self) -> &str {
        &self.info.block_type
    }

    fn info(&self) -> BlockInfo {
        self.info.clone()
    }

    fn create(&self) -> Result<Box<dyn Block>, BlockError> {
        Ok(Box::new(B::default()))
    }
}

/// Registry of available block types.
///
/// Shared by reference between the executor and whatever API surface sits on
/// top; reads run concurrently, registrations take a short write lock.
pub struct BlockRegistry {
    factories: RwLock<HashMap<String, Arc<dyn BlockFactory>>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a block factory. A later registration for the same type
    /// replaces the earlier one.
    pub fn register(&self, factory: Arc<dyn BlockFactory>) {
        let block_type = factory.block_type().to_string();
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if factories.insert(block_type.clone(), factory).is_some() {
            tracing::info!(block_type = %block_type, "Replacing block type registration");
        } else {
            tracing::debug!(block_type = %block_type, "Registering block type");
        }
    }

    fn factory(&self, block_type: &str) -> Result<Arc<dyn BlockFactory>, DefinitionError> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(block_type)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownType(block_type.to_string()))
    }

    /// Create a block instance from its type key
    pub fn create_block(&self, block_type: &str) -> Result<Box<dyn Block>, DefinitionError> {
        let factory = self.factory(block_type)?;
        factory.create().map_err(|e| DefinitionError::Instantiation {
            node: String::new(),
            reason: format!("{} ({})", e, block_type),
        })
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(block_type)
    }

    /// All registered type keys, sorted
    pub fn block_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Metadata for every registered type, sorted by type key
    pub fn describe(&self) -> Vec<BlockInfo> {
        let factories: Vec<Arc<dyn BlockFactory>> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut infos: Vec<BlockInfo> = factories.iter().map(|f| f.info()).collect();
        infos.sort_by(|a, b| a.block_type.cmp(&b.block_type));
        infos
    }

    /// Metadata for a single type
    pub fn describe_type(&self, block_type: &str) -> Result<BlockInfo, DefinitionError> {
        Ok(self.factory(block_type)?.info())
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
