//! # Arena Configuration
//!
//! Capacities for each structure, loaded once from TOML at startup.
//!
//! ```toml
//! [index_allocator]
//! capacity = 64
//!
//! [multi_list]
//! items = 1024
//! lists = 16
//! payload_size = 12
//!
//! [tree]
//! capacity = 256
//! key_size = 8
//! data_size = 16
//! ```
//!
//! Every section is optional; a consumer only sizes what it builds.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, ArenaResult};
use crate::{BalancedIndexTree, IndexAllocator, MultiList, OrderedMultiList, TimedIndexAllocator};

/// Sizing for an [`IndexAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocatorConfig {
    /// Number of slots.
    pub capacity: u32,
}

impl AllocatorConfig {
    /// Bytes an [`IndexAllocator`] with this capacity needs.
    ///
    /// # Errors
    ///
    /// As [`IndexAllocator::size_for`].
    pub fn size_for(&self) -> ArenaResult<u32> {
        IndexAllocator::size_for(self.capacity)
    }

    /// Bytes a [`TimedIndexAllocator`] with this capacity needs.
    ///
    /// # Errors
    ///
    /// As [`TimedIndexAllocator::size_for`].
    pub fn timed_size_for(&self) -> ArenaResult<u32> {
        TimedIndexAllocator::size_for(self.capacity)
    }
}

/// Sizing for a [`MultiList`] or [`OrderedMultiList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListPoolConfig {
    /// Items in the shared pool.
    pub items: u32,
    /// Maximum simultaneous lists.
    pub lists: u32,
    /// Payload bytes per item.
    pub payload_size: u32,
}

impl ListPoolConfig {
    /// Bytes a [`MultiList`] with this shape needs.
    ///
    /// # Errors
    ///
    /// As [`MultiList::size_for`].
    pub fn size_for(&self) -> ArenaResult<u32> {
        MultiList::size_for(self.items, self.lists, self.payload_size)
    }

    /// Bytes an [`OrderedMultiList`] with this shape needs.
    ///
    /// # Errors
    ///
    /// As [`OrderedMultiList::size_for`].
    pub fn ordered_size_for(&self) -> ArenaResult<u32> {
        OrderedMultiList::size_for(self.items, self.lists, self.payload_size)
    }
}

/// Sizing for a [`BalancedIndexTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
    /// Number of nodes.
    pub capacity: u32,
    /// Key bytes per node.
    pub key_size: u32,
    /// Data bytes per node.
    #[serde(default)]
    pub data_size: u32,
}

impl TreeConfig {
    /// Bytes a [`BalancedIndexTree`] with this shape needs.
    ///
    /// # Errors
    ///
    /// As [`BalancedIndexTree::size_for`].
    pub fn size_for(&self) -> ArenaResult<u32> {
        BalancedIndexTree::size_for(self.capacity, self.key_size, self.data_size)
    }
}

/// Capacities for every structure a consumer may build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArenaConfig {
    /// `[index_allocator]`
    #[serde(default)]
    pub index_allocator: Option<AllocatorConfig>,
    /// `[timed_allocator]`
    #[serde(default)]
    pub timed_allocator: Option<AllocatorConfig>,
    /// `[multi_list]`
    #[serde(default)]
    pub multi_list: Option<ListPoolConfig>,
    /// `[ordered_multi_list]`
    #[serde(default)]
    pub ordered_multi_list: Option<ListPoolConfig>,
    /// `[tree]`
    #[serde(default)]
    pub tree: Option<TreeConfig>,
}

impl ArenaConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Config`] on malformed TOML, unknown keys, or sizes no
    /// structure accepts.
    pub fn from_toml_str(text: &str) -> ArenaResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ArenaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> ArenaResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ArenaError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "arena configuration loaded");
        Ok(config)
    }

    /// Checks that every present section describes a buildable structure.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Config`] naming the first bad section.
    pub fn validate(&self) -> ArenaResult<()> {
        if let Some(section) = &self.index_allocator {
            check("index_allocator", section.size_for())?;
        }
        if let Some(section) = &self.timed_allocator {
            check("timed_allocator", section.timed_size_for())?;
        }
        if let Some(section) = &self.multi_list {
            check("multi_list", section.size_for())?;
        }
        if let Some(section) = &self.ordered_multi_list {
            check("ordered_multi_list", section.ordered_size_for())?;
        }
        if let Some(section) = &self.tree {
            check("tree", section.size_for())?;
        }
        Ok(())
    }

    /// Sum of the arena sizes of every configured structure.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Config`] if a section is invalid.
    pub fn total_size(&self) -> ArenaResult<u64> {
        let sizes = [
            self.index_allocator.as_ref().map(AllocatorConfig::size_for),
            self.timed_allocator.as_ref().map(AllocatorConfig::timed_size_for),
            self.multi_list.as_ref().map(ListPoolConfig::size_for),
            self.ordered_multi_list.as_ref().map(ListPoolConfig::ordered_size_for),
            self.tree.as_ref().map(TreeConfig::size_for),
        ];
        sizes.into_iter().flatten().try_fold(0u64, |total, size| -> ArenaResult<u64> {
            let size = size.map_err(|e| ArenaError::Config(e.to_string()))?;
            Ok(total + u64::from(size))
        })
    }
}

fn check(section: &str, size: ArenaResult<u32>) -> ArenaResult<()> {
    size.map(|_| ()).map_err(|e| ArenaError::Config(format!("[{section}] {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = ArenaConfig::from_toml_str(
            r#"
            [index_allocator]
            capacity = 4

            [timed_allocator]
            capacity = 8

            [multi_list]
            items = 3
            lists = 1
            payload_size = 1

            [tree]
            capacity = 2
            key_size = 4
            data_size = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.index_allocator, Some(AllocatorConfig { capacity: 4 }));
        assert_eq!(config.ordered_multi_list, None);
        assert_eq!(config.multi_list.unwrap().size_for().unwrap(), 96);
        assert_eq!(config.tree.unwrap().size_for().unwrap(), 80);
        assert_eq!(config.total_size().unwrap(), 32 + (32 + 8 * 16) + 96 + 80);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = ArenaConfig::from_toml_str("").unwrap();
        assert_eq!(config, ArenaConfig::default());
        assert_eq!(config.total_size().unwrap(), 0);
    }

    #[test]
    fn test_tree_data_size_defaults_to_zero() {
        let config = ArenaConfig::from_toml_str("[tree]\ncapacity = 1\nkey_size = 2\n").unwrap();
        assert_eq!(config.tree.unwrap().data_size, 0);
    }

    #[test]
    fn test_invalid_sections_are_rejected() {
        let err = ArenaConfig::from_toml_str("[index_allocator]\ncapacity = 0\n").unwrap_err();
        match err {
            ArenaError::Config(msg) => assert!(msg.starts_with("[index_allocator]"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            ArenaConfig::from_toml_str("[multi_list]\nitems = 1\nlists = 1\n"),
            Err(ArenaError::Config(_))
        ));
        assert!(matches!(
            ArenaConfig::from_toml_str("[tree]\ncapacity = 1\nkey_size = 4\ncolour = 1\n"),
            Err(ArenaError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ArenaConfig::load("/nonexistent/slotarena.toml"),
            Err(ArenaError::Config(_))
        ));
    }
}
