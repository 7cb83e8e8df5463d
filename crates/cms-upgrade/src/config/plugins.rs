//! XML plugin document.
//!
//! ```xml
//! <UpgradeConfig>
//!   <Module name="pre-upgrade">
//!     <Plugin name="CheckDatabase" class="check-db-version">
//!       <PluginData>
//!         <MinimumVersion type="postgres">12.0</MinimumVersion>
//!       </PluginData>
//!     </Plugin>
//!   </Module>
//! </UpgradeConfig>
//! ```
//!
//! The `PluginData` element is copied into an owned [`XmlElement`] tree so
//! descriptors outlive the parsed document.

use std::collections::HashSet;
use std::path::Path;

use roxmltree::{Document, Node};
use serde::Serialize;

use crate::error::{Result, UpgradeError};

/// One item of an element's mixed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum XmlContent {
    /// Index into [`XmlElement::children`].
    Element(usize),

    /// A text or CDATA run, untrimmed.
    Text(String),
}

/// Owned XML element.
///
/// `text` and `children` are the convenient views plugins read: the
/// concatenated text trimmed, and the child elements. `content` keeps the
/// exact interleaving of text runs and elements for payloads where it
/// matters. Names are local; the element's namespace URI is kept apart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct XmlElement {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
    pub content: Vec<XmlContent>,
}

impl XmlElement {
    /// An element with no attributes, text or children.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a standalone XML fragment. Mostly useful for building payloads in code.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)?;
        Ok(Self::from_node(doc.root_element()))
    }

    fn from_node(node: Node<'_, '_>) -> Self {
        let mut text = String::new();
        let mut children = Vec::new();
        let mut content = Vec::new();
        for child in node.children() {
            if child.is_element() {
                content.push(XmlContent::Element(children.len()));
                children.push(Self::from_node(child));
            } else if let Some(run) = child.text().filter(|_| child.is_text()) {
                text.push_str(run);
                content.push(XmlContent::Text(run.to_string()));
            }
        }

        Self {
            name: node.tag_name().name().to_string(),
            namespace: node.tag_name().namespace().map(str::to_string),
            attributes: node
                .attributes()
                .map(|a| (a.name().to_string(), a.value().to_string()))
                .collect(),
            text: text.trim().to_string(),
            children,
            content,
        }
    }

    /// Text of the element in document order, including the text of
    /// nested elements, untrimmed.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        self.write_inner_text(&mut out);
        out
    }

    fn write_inner_text(&self, out: &mut String) {
        for item in &self.content {
            match item {
                XmlContent::Text(run) => out.push_str(run),
                XmlContent::Element(i) => {
                    if let Some(child) = self.children.get(*i) {
                        child.write_inner_text(out);
                    }
                }
            }
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute that must be present and non-empty.
    pub fn required_attr(&self, name: &str) -> Result<&str> {
        match self.attr(name).map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(UpgradeError::PluginDocument(format!(
                "<{}> requires a '{}' attribute",
                self.name, name
            ))),
        }
    }

    /// Boolean attribute; `true`, `yes` and `1` are true.
    pub fn bool_attr(&self, name: &str) -> Option<bool> {
        self.attr(name)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "yes" | "1"))
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.text.is_empty() && self.children.is_empty()
    }
}

/// One declared plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    /// Display name, unique enough for the operator log.
    pub name: String,

    /// Registry identifier of the implementation.
    pub class: String,

    /// The `PluginData` element, empty when absent.
    pub payload: XmlElement,
}

/// One `<Module>`: an ordered list of plugins.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDef {
    pub name: String,
    pub plugins: Vec<PluginDescriptor>,
}

/// Parsed `<UpgradeConfig>` document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginDocument {
    pub modules: Vec<ModuleDef>,
}

impl PluginDocument {
    /// Load a plugin document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpgradeError::Config(format!(
                "cannot read plugin document {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a plugin document.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().name() != "UpgradeConfig" {
            return Err(UpgradeError::PluginDocument(format!(
                "root element must be <UpgradeConfig>, found <{}>",
                root.tag_name().name()
            )));
        }

        let mut seen = HashSet::new();
        let mut modules = Vec::new();
        for module_node in root.children().filter(|n| n.has_tag_name("Module")) {
            let name = module_node.attribute("name").unwrap_or("").trim();
            if name.is_empty() {
                return Err(UpgradeError::PluginDocument(
                    "<Module> requires a 'name' attribute".into(),
                ));
            }
            if !seen.insert(name.to_string()) {
                return Err(UpgradeError::PluginDocument(format!(
                    "duplicate module '{}'",
                    name
                )));
            }

            let mut plugins = Vec::new();
            for plugin_node in module_node.children().filter(|n| n.has_tag_name("Plugin")) {
                plugins.push(parse_plugin(name, plugin_node)?);
            }

            modules.push(ModuleDef {
                name: name.to_string(),
                plugins,
            });
        }

        Ok(Self { modules })
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Modules to run: all of them, or the named ones in document order.
    ///
    /// Naming a module that is not in the document is a configuration error.
    pub fn select(&self, only: &[String]) -> Result<Vec<&ModuleDef>> {
        if only.is_empty() {
            return Ok(self.modules.iter().collect());
        }
        if let Some(missing) = only.iter().find(|n| self.module(n).is_none()) {
            return Err(UpgradeError::Config(format!(
                "module '{}' is not defined in the plugin document",
                missing
            )));
        }
        Ok(self
            .modules
            .iter()
            .filter(|m| only.iter().any(|n| n == &m.name))
            .collect())
    }
}

fn parse_plugin(module: &str, node: Node<'_, '_>) -> Result<PluginDescriptor> {
    let name = node.attribute("name").unwrap_or("").trim();
    if name.is_empty() {
        return Err(UpgradeError::PluginDocument(format!(
            "<Plugin> in module '{}' requires a non-empty 'name' attribute",
            module
        )));
    }

    let class = node.attribute("class").unwrap_or("").trim();
    if class.is_empty() {
        return Err(UpgradeError::PluginDocument(format!(
            "plugin '{}' in module '{}' requires a 'class' attribute",
            name, module
        )));
    }

    let payload = node
        .children()
        .find(|n| n.has_tag_name("PluginData"))
        .map(XmlElement::from_node)
        .unwrap_or_else(|| XmlElement::empty("PluginData"));

    Ok(PluginDescriptor {
        name: name.to_string(),
        class: class.to_string(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
<UpgradeConfig>
  <!-- checks first -->
  <Module name="pre-upgrade">
    <Plugin name="CheckDatabase" class="check-db-version">
      <PluginData>
        <MinimumVersion type="postgres">12.0</MinimumVersion>
        <MinimumVersion type="mssql">15.0</MinimumVersion>
      </PluginData>
    </Plugin>
  </Module>
  <Module name="upgrade">
    <Plugin name="Cleanup" class="remove-files"/>
  </Module>
</UpgradeConfig>"#;

    #[test]
    fn test_parse_document() {
        let doc = PluginDocument::parse(DOC).unwrap();
        assert_eq!(doc.modules.len(), 2);

        let pre = &doc.modules[0];
        assert_eq!(pre.name, "pre-upgrade");
        assert_eq!(pre.plugins[0].class, "check-db-version");

        let payload = &pre.plugins[0].payload;
        let versions: Vec<_> = payload.children_named("MinimumVersion").collect();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].attr("type"), Some("mssql"));
        assert_eq!(versions[1].text, "15.0");
    }

    #[test]
    fn test_mixed_content_keeps_order_and_namespace() {
        let el = XmlElement::parse(
            r#"<Body xmlns:n="urn:notify">Dear <n:Name>user</n:Name>, see <Link/> now.<!-- skip --></Body>"#,
        )
        .unwrap();

        assert_eq!(el.text, "Dear , see  now.");
        assert_eq!(
            el.content,
            vec![
                XmlContent::Text("Dear ".into()),
                XmlContent::Element(0),
                XmlContent::Text(", see ".into()),
                XmlContent::Element(1),
                XmlContent::Text(" now.".into()),
            ]
        );
        assert_eq!(el.children[0].name, "Name");
        assert_eq!(el.children[0].namespace.as_deref(), Some("urn:notify"));
        assert_eq!(el.children[1].namespace, None);
        assert_eq!(el.inner_text(), "Dear user, see  now.");
    }

    #[test]
    fn test_missing_plugin_data_is_empty() {
        let doc = PluginDocument::parse(DOC).unwrap();
        let payload = &doc.modules[1].plugins[0].payload;
        assert_eq!(payload.name, "PluginData");
        assert!(payload.is_empty());
    }

    #[test]
    fn test_wrong_root() {
        let err = PluginDocument::parse("<Config/>").unwrap_err();
        assert!(matches!(err, UpgradeError::PluginDocument(_)));
    }

    #[test]
    fn test_malformed_xml() {
        let err = PluginDocument::parse("<UpgradeConfig>").unwrap_err();
        assert!(matches!(err, UpgradeError::Xml(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_duplicate_module() {
        let xml = r#"<UpgradeConfig><Module name="a"/><Module name="a"/></UpgradeConfig>"#;
        assert!(PluginDocument::parse(xml).is_err());
    }

    #[test]
    fn test_plugin_requires_name_and_class() {
        let no_name =
            r#"<UpgradeConfig><Module name="a"><Plugin name=" " class="x"/></Module></UpgradeConfig>"#;
        assert!(PluginDocument::parse(no_name).is_err());

        let no_class = r#"<UpgradeConfig><Module name="a"><Plugin name="p"/></Module></UpgradeConfig>"#;
        assert!(PluginDocument::parse(no_class).is_err());
    }

    #[test]
    fn test_select_modules() {
        let doc = PluginDocument::parse(DOC).unwrap();
        assert_eq!(doc.select(&[]).unwrap().len(), 2);

        let only = doc.select(&["upgrade".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "upgrade");

        assert!(doc.select(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_element_helpers() {
        let el = XmlElement::parse(r#"<Deduplicate column="NAME" ignoreCase="yes"/>"#).unwrap();
        assert_eq!(el.required_attr("column").unwrap(), "NAME");
        assert_eq!(el.bool_attr("ignoreCase"), Some(true));
        assert!(el.required_attr("missing").is_err());
    }
}
