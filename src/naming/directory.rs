use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use log::debug;
use serde_json::Value as JsonValue;

use crate::core::{AppError, AppResult};

use super::{NamingCallback, NamingContext, NamingReference, NamingValue};

/// Scheme used when a directory is created without an explicit one.
pub const DEFAULT_SCHEME: &str = "app";

/// Upper bound on subdirectory and reference hops during one resolution.
pub const MAX_RESOLUTION_DEPTH: usize = 32;

struct Binding {
    value: NamingValue,
    args: Vec<JsonValue>,
}

/// One level of the naming tree.
///
/// Entries are keyed by their path relative to this directory. A key may
/// itself contain slashes when it was bound with a scheme prefix, see
/// [`NamingDirectory::bind`].
pub struct NamingDirectory {
    name: String,
    prefix: String,
    identifier: String,
    entries: DashMap<String, Arc<Binding>>,
}

impl NamingDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scheme(name, DEFAULT_SCHEME)
    }

    pub fn with_scheme(name: impl Into<String>, scheme: &str) -> Self {
        let name = name.into();
        Self {
            identifier: format!("{scheme}:{name}"),
            prefix: format!("{scheme}:"),
            name,
            entries: DashMap::new(),
        }
    }

    fn child_of(parent: &NamingDirectory, name: &str) -> Self {
        let identifier = if parent.name.is_empty() {
            format!("{}{name}", parent.prefix)
        } else {
            format!("{}/{name}", parent.identifier)
        };
        Self {
            name: name.to_string(),
            prefix: parent.prefix.clone(),
            identifier,
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `name` carries this directory's scheme prefix.
    pub fn has_scheme(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    /// Number of entries bound directly at this level.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creates a child directory named as if bound under `name`, without
    /// binding it. Bind it later with [`NamingDirectory::bind_directory`].
    pub fn detached_subdirectory(&self, name: &str) -> Arc<NamingDirectory> {
        Arc::new(Self::child_of(self, name.trim_matches('/')))
    }

    /// Creates a child directory and binds it at this level under `name`.
    pub fn create_subdirectory(&self, name: &str) -> AppResult<Arc<NamingDirectory>> {
        let child = self.detached_subdirectory(name);
        let binding = Arc::new(Binding {
            value: child.clone(),
            args: Vec::new(),
        });
        self.insert_entry(name.trim_matches('/'), binding, false, 0)?;
        Ok(child)
    }

    /// Binds an existing directory as a subtree of this one.
    pub fn bind_directory(&self, name: &str, directory: Arc<NamingDirectory>) -> AppResult<()> {
        self.bind(name, directory, Vec::new())
    }

    /// Resolves `name` and downcasts the result.
    pub fn search_as<T>(&self, name: &str, args: &[JsonValue]) -> AppResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        <Self as NamingContext>::search_as(self, name, args)
    }

    fn strip_scheme<'a>(&self, name: &'a str) -> (&'a str, bool) {
        match name.strip_prefix(self.prefix.as_str()) {
            Some(stripped) => (stripped.trim_start_matches('/'), true),
            None => (name.trim_start_matches('/'), false),
        }
    }

    fn child_directory(&self, name: &str) -> Option<Arc<NamingDirectory>> {
        let value = self.entries.get(name).map(|entry| entry.value().value.clone())?;
        value.downcast::<NamingDirectory>().ok()
    }

    fn insert_entry(
        &self,
        path: &str,
        binding: Arc<Binding>,
        traverse: bool,
        depth: usize,
    ) -> AppResult<()> {
        if depth > MAX_RESOLUTION_DEPTH {
            return Err(AppError::NamingDepthExceeded {
                name: path.to_string(),
                depth,
            });
        }

        if traverse && !self.entries.contains_key(path) {
            if let Some((head, rest)) = path.split_once('/') {
                if let Some(child) = self.child_directory(head) {
                    return child.insert_entry(rest, binding, true, depth + 1);
                }
            }
        }

        match self.entries.entry(path.to_string()) {
            Entry::Occupied(_) => Err(AppError::NameAlreadyBound {
                name: path.to_string(),
                directory: self.identifier.clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(binding);
                debug!("Bound {} in naming directory {}", path, self.identifier);
                Ok(())
            }
        }
    }

    fn search_at_depth(
        &self,
        name: &str,
        args: &[JsonValue],
        depth: usize,
    ) -> AppResult<NamingValue> {
        if depth > MAX_RESOLUTION_DEPTH {
            return Err(AppError::NamingDepthExceeded {
                name: name.to_string(),
                depth,
            });
        }

        let (path, _) = self.strip_scheme(name);
        let tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();

        for consumed in 1..=tokens.len() {
            let key = tokens[..consumed].join("/");
            let binding = match self.entries.get(&key) {
                Some(entry) => entry.value().clone(),
                None => continue,
            };
            let remaining = tokens[consumed..].join("/");
            return self.resolve_binding(&binding, &remaining, args, depth);
        }

        Err(AppError::NameNotResolvable {
            name: path.to_string(),
            directory: self.identifier.clone(),
        })
    }

    fn resolve_binding(
        &self,
        binding: &Binding,
        remaining: &str,
        args: &[JsonValue],
        depth: usize,
    ) -> AppResult<NamingValue> {
        if let Some(callback) = binding.value.downcast_ref::<NamingCallback>() {
            let mut merged = binding.args.clone();
            merged.extend_from_slice(args);
            return callback.call(&merged);
        }

        if let Some(reference) = binding.value.downcast_ref::<NamingReference>() {
            return self.search_at_depth(&reference.target, args, depth + 1);
        }

        // a directory is returned as-is only when the whole path was consumed
        if !remaining.is_empty() {
            if let Ok(directory) = binding.value.clone().downcast::<NamingDirectory>() {
                return directory.search_at_depth(remaining, args, depth + 1);
            }
        }

        Ok(binding.value.clone())
    }
}

impl NamingContext for NamingDirectory {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Binds `value` under `name`.
    ///
    /// A bare name may descend into already bound child directories, so
    /// `a/b` lands in directory `a` when one exists. A scheme-prefixed name
    /// is always bound as a flat key at this level.
    fn bind(&self, name: &str, value: NamingValue, args: Vec<JsonValue>) -> AppResult<()> {
        let (path, prefixed) = self.strip_scheme(name);
        if path.is_empty() {
            return Err(AppError::Validation(format!(
                "Can't bind an empty name to naming directory {}",
                self.identifier
            )));
        }
        self.insert_entry(path, Arc::new(Binding { value, args }), !prefixed, 0)
    }

    fn search(&self, name: &str, args: &[JsonValue]) -> AppResult<NamingValue> {
        self.search_at_depth(name, args, 0)
    }
}
