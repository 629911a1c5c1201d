//! Object Cache Module
//!
//! A type-erased view of a typed cache, for hosts that hold caches of
//! different item types behind one interface. Values and options are checked
//! at runtime and a mismatch is reported instead of coerced.

use std::any::{type_name, Any};
use std::sync::Arc;

use crate::cache::disposal::CacheItem;
use crate::cache::entry::EntryOptions;
use crate::cache::in_memory::InMemoryCache;
use crate::error::{CacheError, Result};

pub type AnyItem = Arc<dyn Any + Send + Sync>;

pub trait ObjectCache: Send + Sync {
    /// Name of the concrete item type.
    fn item_type(&self) -> &'static str;

    /// Adds a boxed item. `options`, when given, must be an [`EntryOptions`].
    fn add_object(
        &self,
        key: &str,
        item: Box<dyn Any + Send + Sync>,
        options: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<()>;

    fn get_object(&self, key: &str) -> Result<Option<AnyItem>>;

    fn remove_object(&self, key: &str) -> Result<bool>;

    fn object_count(&self) -> usize;
}

impl<T: CacheItem> ObjectCache for InMemoryCache<T> {
    fn item_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn add_object(
        &self,
        key: &str,
        item: Box<dyn Any + Send + Sync>,
        options: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<()> {
        let options = match options {
            Some(opts) => Some(opts.downcast_ref::<EntryOptions>().ok_or(
                CacheError::OptionMismatch {
                    expected: type_name::<EntryOptions>(),
                },
            )?),
            None => None,
        };
        let item = item.downcast::<T>().map_err(|_| CacheError::OptionMismatch {
            expected: type_name::<T>(),
        })?;
        self.add(key, *item, options).map(|_| ())
    }

    fn get_object(&self, key: &str) -> Result<Option<AnyItem>> {
        Ok(self.get(key)?.map(|item| item as AnyItem))
    }

    fn remove_object(&self, key: &str) -> Result<bool> {
        Ok(self.remove(key)?.is_some())
    }

    fn object_count(&self) -> usize {
        self.count()
    }
}
