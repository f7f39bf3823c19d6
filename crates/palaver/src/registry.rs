//! Capability Registry
//!
//! Holds the tools, prompts, resources, and resource templates a server
//! exposes, with paginated listing and change notifications.
//!
//! Pagination hands out opaque cursors backed by per-entry sequence
//! numbers: registrations append with increasing sequence, so a page
//! cursor stays valid across concurrent registrations and removals -
//! existing entries are never skipped or duplicated, and a removed entry
//! never reappears.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::types::error::ErrorData;
use crate::types::prompt::{GetPromptResult, Prompt};
use crate::types::resource::{ReadResourceResult, Resource, ResourceTemplate};
use crate::types::tool::{CallToolResult, Tool};

/// Default number of entries per list page.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// The four capability kinds a registry manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
    ResourceTemplate,
}

/// Marker event fired on every register/unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    ToolListChanged,
    PromptListChanged,
    ResourceListChanged,
    ResourceTemplateListChanged,
}

impl ChangeEvent {
    fn for_kind(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Tool => ChangeEvent::ToolListChanged,
            CapabilityKind::Prompt => ChangeEvent::PromptListChanged,
            CapabilityKind::Resource => ChangeEvent::ResourceListChanged,
            CapabilityKind::ResourceTemplate => ChangeEvent::ResourceTemplateListChanged,
        }
    }

    /// The notification method announcing this change.
    pub fn method(&self) -> &'static str {
        match self {
            ChangeEvent::ToolListChanged => "notifications/tools/list_changed",
            ChangeEvent::PromptListChanged => "notifications/prompts/list_changed",
            ChangeEvent::ResourceListChanged => "notifications/resources/list_changed",
            ChangeEvent::ResourceTemplateListChanged => {
                "notifications/resources/templates/list_changed"
            }
        }
    }
}

/// Handler for a unary tool call.
pub type ToolHandler = std::sync::Arc<
    dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<CallToolResult, ErrorData>>
        + Send
        + Sync,
>;

/// Handler for a streaming tool call: each item becomes one response frame
/// sharing the request id.
pub type StreamingToolHandler =
    std::sync::Arc<dyn Fn(Map<String, Value>) -> BoxStream<'static, Value> + Send + Sync>;

/// Handler for prompts/get.
pub type PromptHandler = std::sync::Arc<
    dyn Fn(HashMap<String, String>) -> BoxFuture<'static, Result<GetPromptResult, ErrorData>>
        + Send
        + Sync,
>;

/// Handler for resources/read.
pub type ResourceHandler = std::sync::Arc<
    dyn Fn(String) -> BoxFuture<'static, Result<ReadResourceResult, ErrorData>> + Send + Sync,
>;

/// Body of a registered tool.
#[derive(Clone)]
pub enum ToolBody {
    Unary(ToolHandler),
    Streaming(StreamingToolHandler),
}

struct Registered<D, H> {
    seq: u64,
    definition: D,
    handler: H,
}

struct Inner {
    next_seq: u64,
    tools: Vec<Registered<Tool, ToolBody>>,
    prompts: Vec<Registered<Prompt, PromptHandler>>,
    resources: Vec<Registered<Resource, ResourceHandler>>,
    templates: Vec<Registered<ResourceTemplate, Option<ResourceHandler>>>,
}

type Listener = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// Registry of server capabilities.
pub struct CapabilityRegistry {
    inner: RwLock<Inner>,
    listeners: Mutex<Vec<Listener>>,
    page_limit: usize,
}

/// One page of definitions plus the cursor for the next page.
#[derive(Debug)]
pub struct Page<D> {
    pub items: Vec<D>,
    pub next_cursor: Option<String>,
}

impl CapabilityRegistry {
    /// Create a registry with the default page limit.
    pub fn new() -> Self {
        Self::with_page_limit(DEFAULT_PAGE_LIMIT)
    }

    /// Create a registry with a custom page limit (minimum 1).
    pub fn with_page_limit(page_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_seq: 0,
                tools: Vec::new(),
                prompts: Vec::new(),
                resources: Vec::new(),
                templates: Vec::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            page_limit: page_limit.max(1),
        }
    }

    /// Subscribe to change events.
    ///
    /// Events fire synchronously, in registration order, before the
    /// mutating call returns.
    pub fn subscribe(&self, listener: impl Fn(ChangeEvent) + Send + Sync + 'static) {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push(Box::new(listener));
    }

    fn emit(&self, event: ChangeEvent) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(event);
        }
    }

    /// Register a unary tool.
    pub fn register_tool(&self, tool: Tool, handler: ToolHandler) {
        self.insert_tool(tool, ToolBody::Unary(handler));
    }

    /// Register a streaming tool.
    pub fn register_streaming_tool(&self, tool: Tool, handler: StreamingToolHandler) {
        self.insert_tool(tool, ToolBody::Streaming(handler));
    }

    fn insert_tool(&self, tool: Tool, body: ToolBody) {
        {
            let mut inner = self.write();
            let seq = inner.bump();
            inner.tools.push(Registered {
                seq,
                definition: tool,
                handler: body,
            });
        }
        self.emit(ChangeEvent::ToolListChanged);
    }

    /// Register a prompt.
    pub fn register_prompt(&self, prompt: Prompt, handler: PromptHandler) {
        {
            let mut inner = self.write();
            let seq = inner.bump();
            inner.prompts.push(Registered {
                seq,
                definition: prompt,
                handler,
            });
        }
        self.emit(ChangeEvent::PromptListChanged);
    }

    /// Register a resource.
    pub fn register_resource(&self, resource: Resource, handler: ResourceHandler) {
        {
            let mut inner = self.write();
            let seq = inner.bump();
            inner.resources.push(Registered {
                seq,
                definition: resource,
                handler,
            });
        }
        self.emit(ChangeEvent::ResourceListChanged);
    }

    /// Register a resource template, optionally with a read handler tried
    /// for uris no concrete resource matched.
    pub fn register_resource_template(
        &self,
        template: ResourceTemplate,
        handler: Option<ResourceHandler>,
    ) {
        {
            let mut inner = self.write();
            let seq = inner.bump();
            inner.templates.push(Registered {
                seq,
                definition: template,
                handler,
            });
        }
        self.emit(ChangeEvent::ResourceTemplateListChanged);
    }

    /// Remove an entry by name (uri-template for templates, uri for
    /// resources). Returns true if something was removed.
    pub fn unregister(&self, kind: CapabilityKind, name: &str) -> bool {
        let removed = {
            let mut inner = self.write();
            match kind {
                CapabilityKind::Tool => remove_by(&mut inner.tools, |t| t.name == name),
                CapabilityKind::Prompt => remove_by(&mut inner.prompts, |p| p.name == name),
                CapabilityKind::Resource => remove_by(&mut inner.resources, |r| r.uri == name),
                CapabilityKind::ResourceTemplate => {
                    remove_by(&mut inner.templates, |t| t.uri_template == name)
                }
            }
        };
        if removed {
            self.emit(ChangeEvent::for_kind(kind));
        }
        removed
    }

    /// List tools from the given cursor.
    pub fn list_tools(&self, cursor: Option<&str>) -> Result<Page<Tool>, ErrorData> {
        let inner = self.read();
        paginate(&inner.tools, cursor, self.page_limit)
    }

    /// List prompts from the given cursor.
    pub fn list_prompts(&self, cursor: Option<&str>) -> Result<Page<Prompt>, ErrorData> {
        let inner = self.read();
        paginate(&inner.prompts, cursor, self.page_limit)
    }

    /// List resources from the given cursor.
    pub fn list_resources(&self, cursor: Option<&str>) -> Result<Page<Resource>, ErrorData> {
        let inner = self.read();
        paginate(&inner.resources, cursor, self.page_limit)
    }

    /// List resource templates from the given cursor.
    pub fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<ResourceTemplate>, ErrorData> {
        let inner = self.read();
        paginate(&inner.templates, cursor, self.page_limit)
    }

    /// Look up a tool body by name.
    pub fn tool(&self, name: &str) -> Option<(Tool, ToolBody)> {
        let inner = self.read();
        inner
            .tools
            .iter()
            .find(|t| t.definition.name == name)
            .map(|t| (t.definition.clone(), t.handler.clone()))
    }

    /// Look up a prompt handler by name.
    pub fn prompt(&self, name: &str) -> Option<(Prompt, PromptHandler)> {
        let inner = self.read();
        inner
            .prompts
            .iter()
            .find(|p| p.definition.name == name)
            .map(|p| (p.definition.clone(), p.handler.clone()))
    }

    /// Find the read handler for a uri: exact resource match first, then
    /// template handlers in registration order.
    pub fn resource_reader(&self, uri: &str) -> Option<ResourceHandler> {
        let inner = self.read();
        if let Some(entry) = inner.resources.iter().find(|r| r.definition.uri == uri) {
            return Some(entry.handler.clone());
        }
        inner
            .templates
            .iter()
            .filter_map(|t| t.handler.clone())
            .next()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

fn remove_by<D, H>(entries: &mut Vec<Registered<D, H>>, matches: impl Fn(&D) -> bool) -> bool {
    let before = entries.len();
    entries.retain(|e| !matches(&e.definition));
    entries.len() != before
}

fn paginate<D: Clone, H>(
    entries: &[Registered<D, H>],
    cursor: Option<&str>,
    page_limit: usize,
) -> Result<Page<D>, ErrorData> {
    let after_seq = match cursor {
        None | Some("") => None,
        Some(cursor) => Some(decode_cursor(cursor)?),
    };

    let mut items = Vec::new();
    let mut last_seq = None;
    let mut more = false;

    for entry in entries {
        if let Some(after) = after_seq {
            if entry.seq <= after {
                continue;
            }
        }
        if items.len() == page_limit {
            more = true;
            break;
        }
        items.push(entry.definition.clone());
        last_seq = Some(entry.seq);
    }

    let next_cursor = if more {
        last_seq.map(encode_cursor)
    } else {
        None
    };

    Ok(Page { items, next_cursor })
}

fn encode_cursor(seq: u64) -> String {
    format!("c{:08x}", seq)
}

fn decode_cursor(cursor: &str) -> Result<u64, ErrorData> {
    cursor
        .strip_prefix('c')
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| ErrorData::invalid_params(format!("Invalid cursor: {}", cursor)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop_tool(name: &str) -> (Tool, ToolHandler) {
        let tool = Tool::new(name, format!("{} tool", name));
        let handler: ToolHandler =
            Arc::new(|_args| Box::pin(async { Ok(CallToolResult::text("ok")) }));
        (tool, handler)
    }

    fn registry_with_tools(names: &[&str], page_limit: usize) -> CapabilityRegistry {
        let registry = CapabilityRegistry::with_page_limit(page_limit);
        for name in names {
            let (tool, handler) = noop_tool(name);
            registry.register_tool(tool, handler);
        }
        registry
    }

    fn collect_all_tools(registry: &CapabilityRegistry) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = registry.list_tools(cursor.as_deref()).unwrap();
            names.extend(page.items.iter().map(|t| t.name.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        names
    }

    #[test]
    fn test_pagination_preserves_order() {
        let registry = registry_with_tools(&["alpha", "beta", "gamma"], 2);

        let first = registry.list_tools(None).unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].name, "alpha");
        assert_eq!(first.items[1].name, "beta");
        let cursor = first.next_cursor.expect("more pages");

        let second = registry.list_tools(Some(&cursor)).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name, "gamma");
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn test_page_limit_one_full_iteration() {
        let registry = registry_with_tools(&["a", "b", "c", "d"], 1);
        assert_eq!(collect_all_tools(&registry), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_registration_after_cursor_never_duplicates() {
        let registry = registry_with_tools(&["a", "b", "c"], 2);

        let first = registry.list_tools(None).unwrap();
        let cursor = first.next_cursor.unwrap();

        // Register while the cursor is outstanding.
        let (tool, handler) = noop_tool("d");
        registry.register_tool(tool, handler);

        let second = registry.list_tools(Some(&cursor)).unwrap();
        let names: Vec<_> = second.items.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["c", "d"]);
    }

    #[test]
    fn test_removed_entry_never_reappears() {
        let registry = registry_with_tools(&["a", "b", "c"], 2);

        let first = registry.list_tools(None).unwrap();
        let cursor = first.next_cursor.unwrap();

        assert!(registry.unregister(CapabilityKind::Tool, "b"));

        // b was already served; only c remains after the cursor.
        let second = registry.list_tools(Some(&cursor)).unwrap();
        let names: Vec<_> = second.items.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn test_empty_cursor_means_first_page() {
        let registry = registry_with_tools(&["a"], 50);
        let page = registry.list_tools(Some("")).unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_bad_cursor_is_invalid_params() {
        let registry = registry_with_tools(&["a"], 50);
        let err = registry.list_tools(Some("garbage")).unwrap_err();
        assert_eq!(err.code, ErrorData::INVALID_PARAMS);
    }

    #[test]
    fn test_change_events_fire_synchronously() {
        let registry = CapabilityRegistry::new();
        let events = Arc::new(AtomicUsize::new(0));
        let seen = events.clone();
        registry.subscribe(move |event| {
            assert_eq!(event, ChangeEvent::ToolListChanged);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let (tool, handler) = noop_tool("x");
        registry.register_tool(tool, handler);
        assert_eq!(events.load(Ordering::SeqCst), 1);

        registry.unregister(CapabilityKind::Tool, "x");
        assert_eq!(events.load(Ordering::SeqCst), 2);

        // Removing a missing entry fires nothing.
        assert!(!registry.unregister(CapabilityKind::Tool, "x"));
        assert_eq!(events.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lookup_by_name() {
        let registry = registry_with_tools(&["echo"], 50);
        assert!(registry.tool("echo").is_some());
        assert!(registry.tool("missing").is_none());
    }
}
