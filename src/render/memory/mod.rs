//! In-memory rendered document, for fixtures and offline replay.
//!
//! Pages are registered by URL as trees of [`Element`]s. Navigating (or
//! clicking an element that carries a [`link`](Element::link)) loads the
//! registered page and invalidates every previously issued [`ElementRef`].
//! Registering several versions of one URL serves them in order on each
//! load, the last version repeating; this models listings that render
//! differently after a reload.
//!
//! XPath locators are not evaluated and match nothing.

mod selector;

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use self::selector::{SelectorList, Tree};
pub use self::selector::SelectorError;
use super::{ENTER_KEY, ElementRef, Locator, RenderError, RenderingSource, SessionCookie};

/// Builds an element with the given tag name.
#[must_use]
pub fn el(tag: &str) -> Element {
    Element {
        tag: tag.to_ascii_lowercase(),
        ..Element::default()
    }
}

/// Declarative element used to describe fixture pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
    link: Option<String>,
    rendered_after: u32,
}

impl Element {
    /// Adds a class to the `class` attribute.
    #[must_use]
    pub fn class(mut self, class: &str) -> Self {
        if let Some((_, value)) = self.attributes.iter_mut().find(|(name, _)| name == "class") {
            value.push(' ');
            value.push_str(class);
        } else {
            self.attributes.push(("class".to_string(), class.to_string()));
        }
        self
    }

    #[must_use]
    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    /// Sets an attribute, replacing an earlier value of the same name.
    #[must_use]
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.retain(|(existing, _)| existing != name);
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets the element's own text, rendered before its children.
    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    #[must_use]
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    /// Clicking this element, or submitting it with Enter, loads `url`.
    #[must_use]
    pub fn link(mut self, url: &str) -> Self {
        self.link = Some(url.to_string());
        self
    }

    /// Hides the element until `document.readyState` has been read `checks`
    /// times since the page was loaded.
    #[must_use]
    pub fn rendered_after(mut self, checks: u32) -> Self {
        self.rendered_after = checks;
        self
    }
}

/// A page registered under a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPage {
    url: String,
    title: String,
    root: Element,
}

impl MemoryPage {
    #[must_use]
    pub fn new(url: &str, root: Element) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            root,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }
}

#[derive(Debug)]
struct Node {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    link: Option<String>,
    rendered_after: u32,
    value: String,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// A loaded page flattened into an arena, nodes in document order.
#[derive(Debug)]
struct Document {
    url: String,
    title: String,
    generation: u64,
    nodes: Vec<Node>,
    ready_checks: u32,
}

impl Document {
    fn load(page: &MemoryPage, generation: u64) -> Self {
        let mut document = Self {
            url: page.url.clone(),
            title: page.title.clone(),
            generation,
            nodes: Vec::new(),
            ready_checks: 0,
        };
        document.insert(&page.root, None);
        document
    }

    fn insert(&mut self, element: &Element, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        let value = element
            .attributes
            .iter()
            .find(|(name, _)| name == "value")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        self.nodes.push(Node {
            tag: element.tag.clone(),
            attributes: element.attributes.clone(),
            text: element.text.clone(),
            link: element.link.clone(),
            rendered_after: element.rendered_after,
            value,
            parent,
            children: Vec::new(),
        });
        for child in &element.children {
            let child_index = self.insert(child, Some(index));
            self.nodes[index].children.push(child_index);
        }
        index
    }

    fn is_rendered(&self, node: usize) -> bool {
        let mut current = Some(node);
        while let Some(index) = current {
            if self.nodes[index].rendered_after > self.ready_checks {
                return false;
            }
            current = self.nodes[index].parent;
        }
        true
    }

    fn reference(&self, node: usize) -> ElementRef {
        ElementRef::new(format!("mem-{}-{node}", self.generation))
    }

    fn resolve(&self, element: &ElementRef) -> Option<usize> {
        let rest = element.id().strip_prefix("mem-")?;
        let (generation, node) = rest.split_once('-')?;
        let generation: u64 = generation.parse().ok()?;
        let node: usize = node.parse().ok()?;
        (generation == self.generation && node < self.nodes.len() && self.is_rendered(node))
            .then_some(node)
    }

    fn descendants(&self, node: usize, out: &mut Vec<usize>) {
        for &child in &self.nodes[node].children {
            out.push(child);
            self.descendants(child, out);
        }
    }

    fn text_content(&self, node: usize) -> String {
        let mut text = self.nodes[node].text.clone();
        for &child in &self.nodes[node].children {
            if self.is_rendered(child) {
                text.push_str(&self.text_content(child));
            }
        }
        text
    }

    fn select(&self, scope: Option<usize>, selector: &SelectorList) -> Vec<usize> {
        let candidates = match scope {
            Some(root) => {
                let mut nodes = Vec::new();
                self.descendants(root, &mut nodes);
                nodes
            }
            None => (0..self.nodes.len()).collect(),
        };
        candidates
            .into_iter()
            .filter(|&node| self.is_rendered(node) && selector.matches(self, node))
            .collect()
    }
}

impl Tree for Document {
    fn tag(&self, node: usize) -> &str {
        &self.nodes[node].tag
    }

    fn attribute(&self, node: usize, name: &str) -> Option<&str> {
        self.nodes[node]
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn parent(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent
    }
}

#[derive(Debug)]
struct BrowserState {
    pages: HashMap<String, VecDeque<MemoryPage>>,
    document: Option<Document>,
    generation: u64,
    history: Vec<String>,
    clicks: Vec<String>,
    refreshes: u32,
    stale_clicks: u32,
    cookies: Vec<SessionCookie>,
    user_agent: Option<String>,
    ready_state: String,
    scripts: HashMap<String, Value>,
    closed: bool,
}

impl Default for BrowserState {
    fn default() -> Self {
        Self {
            pages: HashMap::new(),
            document: None,
            generation: 0,
            history: Vec::new(),
            clicks: Vec::new(),
            refreshes: 0,
            stale_clicks: 0,
            cookies: Vec::new(),
            user_agent: None,
            ready_state: "complete".to_string(),
            scripts: HashMap::new(),
            closed: false,
        }
    }
}

impl BrowserState {
    fn load(&mut self, url: &str) -> Result<(), RenderError> {
        let versions = self
            .pages
            .get_mut(url)
            .ok_or_else(|| RenderError::navigation(url, "no page registered for URL"))?;
        let page = if versions.len() > 1 {
            versions.pop_front()
        } else {
            versions.front().cloned()
        }
        .ok_or_else(|| RenderError::navigation(url, "no page registered for URL"))?;

        self.generation += 1;
        self.document = Some(Document::load(&page, self.generation));
        self.history.push(url.to_string());
        trace!(url, generation = self.generation, "memory page loaded");
        Ok(())
    }

    fn document(&self) -> Result<&Document, RenderError> {
        self.document
            .as_ref()
            .ok_or_else(|| RenderError::navigation("about:blank", "no page loaded"))
    }

    fn node(&self, element: &ElementRef) -> Result<usize, RenderError> {
        self.document
            .as_ref()
            .and_then(|document| document.resolve(element))
            .ok_or_else(|| RenderError::stale(element))
    }

    fn click(&mut self, element: &ElementRef) -> Result<(), RenderError> {
        if self.stale_clicks > 0 {
            self.stale_clicks -= 1;
            return Err(RenderError::stale(element));
        }
        let node = self.node(element)?;
        let document = self.document()?;
        let link = document.nodes[node].link.clone();
        self.clicks.push(element.id().to_string());
        match link {
            Some(url) => self.load(&url),
            None => Ok(()),
        }
    }
}

fn parse_css(locator: &Locator) -> Result<Option<SelectorList>, RenderError> {
    match locator {
        Locator::Css(selector) => SelectorList::parse(selector)
            .map(Some)
            .map_err(|error| RenderError::protocol("find element", "invalid selector", error.to_string())),
        Locator::XPath(_) => Ok(None),
    }
}

/// A [`RenderingSource`] over registered in-memory pages.
#[derive(Debug, Default)]
pub struct MemoryBrowser {
    state: Mutex<BrowserState>,
}

impl MemoryBrowser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `page`; repeated registrations of one URL queue versions.
    pub fn add_page(&self, page: MemoryPage) {
        self.state()
            .pages
            .entry(page.url.clone())
            .or_default()
            .push_back(page);
    }

    #[must_use]
    pub fn with_page(self, page: MemoryPage) -> Self {
        self.add_page(page);
        self
    }

    #[must_use]
    pub fn with_cookie(self, cookie: SessionCookie) -> Self {
        self.state().cookies.push(cookie);
        self
    }

    #[must_use]
    pub fn with_user_agent(self, user_agent: &str) -> Self {
        self.state().user_agent = Some(user_agent.to_string());
        self
    }

    /// Value reported for `document.readyState` (default `complete`).
    #[must_use]
    pub fn with_ready_state(self, state: &str) -> Self {
        self.state().ready_state = state.to_string();
        self
    }

    /// Result returned when exactly `script` is evaluated.
    #[must_use]
    pub fn with_script_result(self, script: &str, result: Value) -> Self {
        self.state().scripts.insert(script.to_string(), result);
        self
    }

    /// Makes the next `count` clicks fail with a stale-reference error.
    pub fn fail_next_clicks_as_stale(&self, count: u32) {
        self.state().stale_clicks = count;
    }

    /// URLs loaded so far, including reloads.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.state().history.clone()
    }

    #[must_use]
    pub fn click_count(&self) -> usize {
        self.state().clicks.len()
    }

    #[must_use]
    pub fn refresh_count(&self) -> u32 {
        self.state().refreshes
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Current `value` of the first element matching the CSS `selector`.
    #[must_use]
    pub fn input_value(&self, selector: &str) -> Option<String> {
        let state = self.state();
        let document = state.document.as_ref()?;
        let list = SelectorList::parse(selector).ok()?;
        let node = document.select(None, &list).into_iter().next()?;
        Some(document.nodes[node].value.clone())
    }
}

#[async_trait]
impl RenderingSource for MemoryBrowser {
    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        self.state().load(url)
    }

    async fn current_url(&self) -> Result<String, RenderError> {
        Ok(self
            .state()
            .document
            .as_ref()
            .map_or_else(|| "about:blank".to_string(), |document| document.url.clone()))
    }

    async fn find_one(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<Option<ElementRef>, RenderError> {
        Ok(self.find_all(scope, locator).await?.into_iter().next())
    }

    async fn find_all(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<Vec<ElementRef>, RenderError> {
        let Some(selector) = parse_css(locator)? else {
            return Ok(Vec::new());
        };
        let state = self.state();
        let scope = scope.map(|element| state.node(element)).transpose()?;
        let document = state.document()?;
        Ok(document
            .select(scope, &selector)
            .into_iter()
            .map(|node| document.reference(node))
            .collect())
    }

    async fn closest(
        &self,
        element: &ElementRef,
        selector: &str,
    ) -> Result<Option<ElementRef>, RenderError> {
        let list = SelectorList::parse(selector).map_err(|error| {
            RenderError::protocol("closest", "invalid selector", error.to_string())
        })?;
        let state = self.state();
        let node = state.node(element)?;
        let document = state.document()?;
        let mut current = Some(node);
        while let Some(index) = current {
            if list.matches(document, index) {
                return Ok(Some(document.reference(index)));
            }
            current = document.nodes[index].parent;
        }
        Ok(None)
    }

    async fn text(&self, element: &ElementRef) -> Result<String, RenderError> {
        let state = self.state();
        let node = state.node(element)?;
        Ok(state.document()?.text_content(node))
    }

    async fn property(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        let state = self.state();
        let node = state.node(element)?;
        let document = state.document()?;
        Ok(match name {
            "textContent" | "innerText" => Some(document.text_content(node)),
            "value" => Some(document.nodes[node].value.clone()),
            other => document.attribute(node, other).map(ToString::to_string),
        })
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        let state = self.state();
        let node = state.node(element)?;
        Ok(state
            .document()?
            .attribute(node, name)
            .map(ToString::to_string))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), RenderError> {
        self.state().click(element)
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), RenderError> {
        let mut state = self.state();
        let node = state.node(element)?;
        if let Some(document) = state.document.as_mut() {
            document.nodes[node].value.clear();
        }
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), RenderError> {
        let mut state = self.state();
        let node = state.node(element)?;
        let submit = text.contains(ENTER_KEY);
        let typed = text.replace(ENTER_KEY, "");
        let link = match state.document.as_mut() {
            Some(document) => {
                document.nodes[node].value.push_str(&typed);
                document.nodes[node].link.clone()
            }
            None => None,
        };
        match link {
            Some(url) if submit => state.load(&url),
            _ => Ok(()),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, RenderError> {
        let mut state = self.state();
        if script.contains("document.readyState") {
            let ready_state = state.ready_state.clone();
            return Ok(match state.document.as_mut() {
                Some(document) => {
                    document.ready_checks = document.ready_checks.saturating_add(1);
                    Value::String(ready_state)
                }
                None => Value::String("uninitialized".to_string()),
            });
        }
        if let Some(result) = state.scripts.get(script) {
            return Ok(result.clone());
        }
        if script.contains("jQuery") {
            return Ok(Value::Bool(true));
        }
        if script.contains("navigator.userAgent") {
            return Ok(state
                .user_agent
                .clone()
                .map_or(Value::Null, Value::String));
        }
        if script.contains("document.title") {
            return Ok(Value::String(
                state
                    .document
                    .as_ref()
                    .map(|document| document.title.clone())
                    .unwrap_or_default(),
            ));
        }
        Ok(Value::Null)
    }

    async fn evaluate_on(&self, script: &str, element: &ElementRef) -> Result<Value, RenderError> {
        let mut state = self.state();
        if script.contains(".click()") {
            state.click(element)?;
            return Ok(Value::Null);
        }
        state.node(element)?;
        Ok(state.scripts.get(script).cloned().unwrap_or(Value::Null))
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, RenderError> {
        Ok(self.state().cookies.clone())
    }

    async fn refresh(&self) -> Result<(), RenderError> {
        let mut state = self.state();
        let url = state.document()?.url.clone();
        state.refreshes += 1;
        state.load(&url)
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.state().closed = true;
        Ok(())
    }
}
