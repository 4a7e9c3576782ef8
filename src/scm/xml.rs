//! Minimal element/attribute access over `xot` for tool XML output.

use xot::{Node, Xot};

use crate::error::{Error, Result};

pub(crate) struct XmlDoc {
    xot: Xot,
    root: Node,
    tool: &'static str,
}

impl XmlDoc {
    pub(crate) fn parse(xml: &str, tool: &'static str) -> Result<Self> {
        let mut xot = Xot::new();
        let document = xot.parse(xml).map_err(|e| Error::ToolOutput {
            tool: tool.to_string(),
            message: format!("invalid XML: {}", e),
        })?;
        let root = xot
            .children(document)
            .find(|node| xot.is_element(*node))
            .ok_or_else(|| Error::ToolOutput {
                tool: tool.to_string(),
                message: "XML document has no root element".to_string(),
            })?;
        Ok(Self { xot, root, tool })
    }

    pub(crate) fn root(&self) -> Node {
        self.root
    }

    fn is_named(&self, node: Node, name: &str) -> bool {
        match (self.xot.element(node), self.xot.name(name)) {
            (Some(element), Some(id)) => element.name() == id,
            _ => false,
        }
    }

    /// Direct element children of `node` named `name`.
    pub(crate) fn children(&self, node: Node, name: &str) -> Vec<Node> {
        self.xot
            .children(node)
            .filter(|child| self.is_named(*child, name))
            .collect()
    }

    pub(crate) fn child(&self, node: Node, name: &str) -> Option<Node> {
        self.children(node, name).into_iter().next()
    }

    /// Every element named `name` at any depth below `node`, in document order.
    pub(crate) fn descendants(&self, node: Node, name: &str) -> Vec<Node> {
        let mut found = Vec::new();
        for child in self.xot.children(node) {
            if self.is_named(child, name) {
                found.push(child);
            }
            if self.xot.is_element(child) {
                found.extend(self.descendants(child, name));
            }
        }
        found
    }

    pub(crate) fn attribute(&self, node: Node, name: &str) -> Option<String> {
        let id = self.xot.name(name)?;
        self.xot.get_attribute(node, id).map(str::to_string)
    }

    pub(crate) fn required_attribute(&self, node: Node, name: &str) -> Result<String> {
        self.attribute(node, name).ok_or_else(|| Error::ToolOutput {
            tool: self.tool.to_string(),
            message: format!("missing attribute '{}'", name),
        })
    }

    /// Concatenated text of `node`'s direct text children.
    pub(crate) fn text(&self, node: Node) -> String {
        self.xot
            .children(node)
            .filter_map(|child| self.xot.text_str(child))
            .collect()
    }

    pub(crate) fn child_text(&self, node: Node, name: &str) -> Option<String> {
        self.child(node, name).map(|child| self.text(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation() {
        let doc = XmlDoc::parse(
            r#"<?xml version="1.0"?>
<log>
  <logentry revision="7"><author>bob</author><msg>a &amp; b</msg>
    <paths><path action="M">/trunk/a.rs</path></paths>
  </logentry>
  <logentry revision="6"><msg/></logentry>
</log>"#,
            "svn",
        )
        .unwrap();
        let entries = doc.children(doc.root(), "logentry");
        assert_eq!(entries.len(), 2);
        assert_eq!(doc.attribute(entries[0], "revision").as_deref(), Some("7"));
        assert_eq!(doc.child_text(entries[0], "msg").as_deref(), Some("a & b"));
        assert_eq!(doc.child_text(entries[1], "msg").as_deref(), Some(""));
        assert_eq!(doc.descendants(doc.root(), "path").len(), 1);
        assert!(doc.required_attribute(entries[1], "nope").is_err());
    }

    #[test]
    fn test_invalid_xml_is_tool_output_error() {
        assert!(matches!(
            XmlDoc::parse("<log><unclosed></log>", "svn"),
            Err(Error::ToolOutput { .. })
        ));
    }
}
