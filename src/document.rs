//! Configuration document model
//!
//! In-memory tree for the device's `SystemConfiguration` export: component
//! nodes keyed by FQDD, attribute leaves holding string values. The device
//! comments out attributes it currently does not expose (for example
//! `BiosBootSeq` when boot mode is UEFI, or the physical-disk members of a
//! virtual disk); those payloads are parsed into *shadow* values on the
//! attribute entries, so lookups fall back to them without re-scanning
//! comment text. A live value always wins over its shadow.

use crate::error::{Error, Result};

/// A named leaf value under a component.
///
/// `value` is the live text from an uncommented `<Attribute>` node; `shadow`
/// is the comment-encoded fallback. At least one of the two is always set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    pub shadow: Option<String>,
}

impl Attribute {
    /// Create a live attribute.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            shadow: None,
        }
    }

    /// Resolve the attribute value; live wins over shadow.
    pub fn resolved(&self) -> Option<&str> {
        self.value.as_deref().or(self.shadow.as_deref())
    }

    /// Whether the attribute exists as a live (uncommented) node.
    pub fn is_live(&self) -> bool {
        self.value.is_some()
    }
}

/// A named container in the configuration tree: a BIOS settings block, a
/// RAID controller, a NIC partition. Identified by an FQDD unique within
/// its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Component {
    pub fqdd: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Component>,
}

impl Component {
    pub fn new(fqdd: impl Into<String>) -> Self {
        Self {
            fqdd: fqdd.into(),
            ..Self::default()
        }
    }

    /// Direct child component by FQDD.
    pub fn child(&self, fqdd: &str) -> Option<&Component> {
        self.children.iter().find(|c| c.fqdd == fqdd)
    }

    pub fn child_mut(&mut self, fqdd: &str) -> Option<&mut Component> {
        self.children.iter_mut().find(|c| c.fqdd == fqdd)
    }

    /// First attribute entry with the given name, preferring live entries.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.is_live())
            .or_else(|| self.attributes.iter().find(|a| a.name == name))
    }

    /// Resolved value of the named attribute (live wins over shadow).
    pub fn value(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(Attribute::resolved)
    }

    /// All resolved values for a repeated attribute name, in document order.
    pub fn values_of(&self, name: &str) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.name == name)
            .filter_map(Attribute::resolved)
            .collect()
    }

    /// Whether a live (uncommented) attribute with this name exists.
    pub fn has_live_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name && a.is_live())
    }

    /// Set an attribute value, creating the entry if absent. A shadow-only
    /// entry is promoted to a live one.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        if let Some(attr) = self.attributes.iter_mut().find(|a| a.name == name) {
            attr.value = Some(value.into());
        } else {
            self.attributes.push(Attribute::new(name, value));
        }
    }

    /// Append a live attribute entry without replacing same-named ones
    /// (repeated-name lists such as `IncludedPhysicalDiskID`).
    pub fn push_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.push(Attribute::new(name, value));
    }

    /// Remove every live attribute entry with this name. Returns whether
    /// anything was removed.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        let before = self.attributes.len();
        self.attributes.retain(|a| !(a.name == name && a.is_live()));
        self.attributes.len() != before
    }

    /// Remove a direct child component. Returns whether it existed.
    pub fn remove_child(&mut self, fqdd: &str) -> bool {
        let before = self.children.len();
        self.children.retain(|c| c.fqdd != fqdd);
        self.children.len() != before
    }

    /// Whether any live attribute with this name exists in this subtree.
    pub fn contains_live_attribute(&self, name: &str) -> bool {
        self.has_live_attribute(name)
            || self.children.iter().any(|c| c.contains_live_attribute(name))
    }

    fn strip_shadows(&mut self) {
        for attr in &mut self.attributes {
            attr.shadow = None;
        }
        self.attributes.retain(Attribute::is_live);
        for child in &mut self.children {
            child.strip_shadows();
        }
    }

    fn attach_shadow(&mut self, name: &str, value: String) {
        if let Some(attr) = self
            .attributes
            .iter_mut()
            .find(|a| a.name == name && a.is_live() && a.shadow.is_none())
        {
            attr.shadow = Some(value);
        } else {
            self.attributes.push(Attribute {
                name: name.to_string(),
                value: None,
                shadow: Some(value),
            });
        }
    }
}

/// An ordered configuration tree rooted at `SystemConfiguration`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    /// Root element attributes (Model, ServiceTag, TimeStamp, ...) in
    /// document order.
    pub attrs: Vec<(String, String)>,
    pub components: Vec<Component>,
}

impl Document {
    /// Top-level component by FQDD.
    pub fn component(&self, fqdd: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.fqdd == fqdd)
    }

    pub fn component_mut(&mut self, fqdd: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.fqdd == fqdd)
    }

    /// Component anywhere in the tree by FQDD.
    pub fn find_component(&self, fqdd: &str) -> Option<&Component> {
        fn walk<'a>(comps: &'a [Component], fqdd: &str) -> Option<&'a Component> {
            for c in comps {
                if c.fqdd == fqdd {
                    return Some(c);
                }
                if let Some(found) = walk(&c.children, fqdd) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.components, fqdd)
    }

    /// Get or create a top-level component.
    pub fn component_or_insert(&mut self, fqdd: &str) -> &mut Component {
        let idx = match self.components.iter().position(|c| c.fqdd == fqdd) {
            Some(idx) => idx,
            None => {
                self.components.push(Component::new(fqdd));
                self.components.len() - 1
            }
        };
        &mut self.components[idx]
    }

    /// Remove a top-level component. Returns whether it existed.
    pub fn remove_component(&mut self, fqdd: &str) -> bool {
        let before = self.components.len();
        self.components.retain(|c| c.fqdd != fqdd);
        self.components.len() != before
    }

    /// FQDDs of top-level components matching a predicate.
    pub fn component_fqdds_where(&self, pred: impl Fn(&str) -> bool) -> Vec<String> {
        self.components
            .iter()
            .filter(|c| pred(&c.fqdd))
            .map(|c| c.fqdd.clone())
            .collect()
    }

    /// Drop top-level components matching a predicate.
    pub fn remove_components_where(&mut self, pred: impl Fn(&str) -> bool) {
        self.components.retain(|c| !pred(&c.fqdd));
    }

    /// Whether any live attribute with this name exists anywhere.
    pub fn contains_live_attribute(&self, name: &str) -> bool {
        self.components
            .iter()
            .any(|c| c.contains_live_attribute(name))
    }

    /// Set a root element attribute, replacing an existing entry.
    pub fn set_root_attr(&mut self, name: &str, value: impl Into<String>) {
        if let Some(entry) = self.attrs.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value.into();
        } else {
            self.attrs.push((name.to_string(), value.into()));
        }
    }

    pub fn root_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Drop all shadow values and shadow-only entries. Submissions must not
    /// carry the device's diagnostic comments back.
    pub fn strip_shadows(&mut self) {
        for c in &mut self.components {
            c.strip_shadows();
        }
    }

    /// Parse a `SystemConfiguration` document.
    pub fn parse(input: &str) -> Result<Document> {
        Parser::new(input).parse_document()
    }

    /// Serialize with 2-space indentation. Shadow-only entries are omitted.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push_str("<SystemConfiguration");
        for (name, value) in &self.attrs {
            out.push_str(&format!(" {}=\"{}\"", name, escape(value)));
        }
        if self.components.is_empty() {
            out.push_str("/>\n");
            return out;
        }
        out.push_str(">\n");
        for component in &self.components {
            write_component(&mut out, component, 1);
        }
        out.push_str("</SystemConfiguration>\n");
        out
    }
}

fn write_component(out: &mut String, component: &Component, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{}<Component FQDD=\"{}\">\n",
        indent,
        escape(&component.fqdd)
    ));
    for attr in &component.attributes {
        if let Some(value) = &attr.value {
            out.push_str(&format!(
                "{}  <Attribute Name=\"{}\">{}</Attribute>\n",
                indent,
                escape(&attr.name),
                escape(value)
            ));
        }
    }
    for child in &component.children {
        write_component(out, child, depth + 1);
    }
    out.push_str(&format!("{indent}</Component>\n"));
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let replaced = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| rest.starts_with(entity));
        if let Some((entity, ch)) = replaced {
            out.push(*ch);
            rest = &rest[entity.len()..];
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Minimal parser for the fixed `SystemConfiguration` element subset. The
/// device emits nothing beyond `Component`, `Attribute`, comments and an
/// optional XML declaration, so a full XML implementation is not required.
struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        let src = src.strip_prefix('\u{feff}').unwrap_or(src);
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(Error::parse(self.pos, format!("expected `{token}`")))
        }
    }

    /// Advance past `token`, returning the text before it.
    fn take_until(&mut self, token: &str) -> Result<&'a str> {
        match self.rest().find(token) {
            Some(idx) => {
                let text = &self.rest()[..idx];
                self.pos += idx + token.len();
                Ok(text)
            }
            None => Err(Error::parse(self.pos, format!("unterminated, expected `{token}`"))),
        }
    }

    fn parse_document(&mut self) -> Result<Document> {
        self.skip_ws();
        if self.starts_with("<?xml") {
            self.take_until("?>")?;
            self.skip_ws();
        }
        self.expect("<SystemConfiguration")?;
        let (attrs, self_closing) = self.parse_element_attrs()?;
        let mut doc = Document {
            attrs,
            components: Vec::new(),
        };
        if self_closing {
            return Ok(doc);
        }
        loop {
            self.skip_ws();
            if self.starts_with("</SystemConfiguration>") {
                self.expect("</SystemConfiguration>")?;
                return Ok(doc);
            }
            if self.starts_with("<!--") {
                // Root-level comments carry no attribute payloads
                self.pos += 4;
                self.take_until("-->")?;
            } else if self.starts_with("<Component") {
                doc.components.push(self.parse_component()?);
            } else {
                return Err(Error::parse(self.pos, "expected Component or end of document"));
            }
        }
    }

    fn parse_component(&mut self) -> Result<Component> {
        self.expect("<Component")?;
        let (attrs, self_closing) = self.parse_element_attrs()?;
        let fqdd = attrs
            .into_iter()
            .find(|(k, _)| k == "FQDD")
            .map(|(_, v)| v)
            .ok_or_else(|| Error::parse(self.pos, "Component without FQDD"))?;
        let mut component = Component::new(fqdd);
        if self_closing {
            return Ok(component);
        }
        loop {
            self.skip_ws();
            if self.starts_with("</Component>") {
                self.expect("</Component>")?;
                return Ok(component);
            }
            if self.starts_with("<!--") {
                self.pos += 4;
                let payload = self.take_until("-->")?;
                if let Some((name, value)) = parse_comment_attribute(payload) {
                    component.attach_shadow(&name, value);
                }
            } else if self.starts_with("<Component") {
                let child = self.parse_component()?;
                component.children.push(child);
            } else if self.starts_with("<Attribute") {
                let (name, value) = self.parse_attribute()?;
                component.attributes.push(Attribute::new(name, value));
            } else {
                return Err(Error::parse(self.pos, "expected Attribute, Component or comment"));
            }
        }
    }

    fn parse_attribute(&mut self) -> Result<(String, String)> {
        self.expect("<Attribute")?;
        let (attrs, self_closing) = self.parse_element_attrs()?;
        let name = attrs
            .into_iter()
            .find(|(k, _)| k == "Name")
            .map(|(_, v)| v)
            .ok_or_else(|| Error::parse(self.pos, "Attribute without Name"))?;
        if self_closing {
            return Ok((name, String::new()));
        }
        let text = self.take_until("</Attribute>")?;
        Ok((name, unescape(text)))
    }

    /// Parse `name="value"` pairs up to `>` or `/>`.
    fn parse_element_attrs(&mut self) -> Result<(Vec<(String, String)>, bool)> {
        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            if self.starts_with("/>") {
                self.pos += 2;
                return Ok((attrs, true));
            }
            if self.starts_with(">") {
                self.pos += 1;
                return Ok((attrs, false));
            }
            let eq = self
                .rest()
                .find('=')
                .ok_or_else(|| Error::parse(self.pos, "malformed element attribute"))?;
            let name = self.rest()[..eq].trim().to_string();
            if name.is_empty() || name.contains('<') {
                return Err(Error::parse(self.pos, "malformed element attribute name"));
            }
            self.pos += eq + 1;
            self.skip_ws();
            let quote = match self.rest().chars().next() {
                Some(c @ ('"' | '\'')) => c,
                _ => return Err(Error::parse(self.pos, "expected quoted attribute value")),
            };
            self.pos += 1;
            let value = self.take_until(&quote.to_string())?;
            attrs.push((name, unescape(value)));
        }
    }
}

/// Try to read a comment payload as a single serialized `<Attribute>` node.
/// Anything else (free-form text the device sometimes emits) is ignored.
fn parse_comment_attribute(payload: &str) -> Option<(String, String)> {
    let trimmed = payload.trim();
    if !trimmed.starts_with("<Attribute") {
        return None;
    }
    let mut parser = Parser::new(trimmed);
    parser.parse_attribute().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<SystemConfiguration Model="PowerEdge R630" ServiceTag="ABC1234">
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="ProcVirtualization">Enabled</Attribute>
    <Attribute Name="IntegratedRaid">Enabled</Attribute>
    <!-- <Attribute Name="BiosBootSeq">HardDisk.List.1-1</Attribute> -->
  </Component>
  <Component FQDD="RAID.Integrated.1-1">
    <Component FQDD="Disk.Virtual.0:RAID.Integrated.1-1">
      <Attribute Name="RAIDTypes">RAID 10</Attribute>
      <!-- <Attribute Name="IncludedPhysicalDiskID">Disk.Bay.0:Enc.1:RAID.Integrated.1-1</Attribute> -->
      <!-- <Attribute Name="IncludedPhysicalDiskID">Disk.Bay.1:Enc.1:RAID.Integrated.1-1</Attribute> -->
    </Component>
  </Component>
</SystemConfiguration>"#;

    #[test]
    fn parses_components_and_attributes() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert_eq!(doc.root_attr("ServiceTag"), Some("ABC1234"));
        let bios = doc.component("BIOS.Setup.1-1").unwrap();
        assert_eq!(bios.value("ProcVirtualization"), Some("Enabled"));
        let raid = doc.component("RAID.Integrated.1-1").unwrap();
        let vd = raid.child("Disk.Virtual.0:RAID.Integrated.1-1").unwrap();
        assert_eq!(vd.value("RAIDTypes"), Some("RAID 10"));
    }

    #[test]
    fn comment_payload_becomes_shadow_value() {
        let doc = Document::parse(SAMPLE).unwrap();
        let bios = doc.component("BIOS.Setup.1-1").unwrap();
        // No live BiosBootSeq node, only the commented payload
        assert!(!bios.has_live_attribute("BiosBootSeq"));
        assert_eq!(bios.value("BiosBootSeq"), Some("HardDisk.List.1-1"));
    }

    #[test]
    fn live_value_wins_over_shadow() {
        let input = r#"<SystemConfiguration>
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="BootMode">Bios</Attribute>
    <!-- <Attribute Name="BootMode">Uefi</Attribute> -->
  </Component>
</SystemConfiguration>"#;
        let doc = Document::parse(input).unwrap();
        let bios = doc.component("BIOS.Setup.1-1").unwrap();
        assert_eq!(bios.value("BootMode"), Some("Bios"));
        let attr = bios.attribute("BootMode").unwrap();
        assert_eq!(attr.shadow.as_deref(), Some("Uefi"));
    }

    #[test]
    fn repeated_names_collect_all_values() {
        let doc = Document::parse(SAMPLE).unwrap();
        let raid = doc.component("RAID.Integrated.1-1").unwrap();
        let vd = raid.child("Disk.Virtual.0:RAID.Integrated.1-1").unwrap();
        assert_eq!(
            vd.values_of("IncludedPhysicalDiskID"),
            vec![
                "Disk.Bay.0:Enc.1:RAID.Integrated.1-1",
                "Disk.Bay.1:Enc.1:RAID.Integrated.1-1",
            ]
        );
    }

    #[test]
    fn strip_shadows_drops_comment_entries() {
        let mut doc = Document::parse(SAMPLE).unwrap();
        doc.strip_shadows();
        let bios = doc.component("BIOS.Setup.1-1").unwrap();
        assert_eq!(bios.value("BiosBootSeq"), None);
        assert!(!doc.to_xml().contains("BiosBootSeq"));
    }

    #[test]
    fn serializes_escaped_values() {
        let mut doc = Document::default();
        doc.set_root_attr("ServiceTag", "A&B");
        let c = doc.component_or_insert("BIOS.Setup.1-1");
        c.set_attribute("AssetTag", "x<y>");
        let xml = doc.to_xml();
        assert!(xml.contains("ServiceTag=\"A&amp;B\""));
        assert!(xml.contains("x&lt;y&gt;"));
        let reparsed = Document::parse(&xml).unwrap();
        assert_eq!(
            reparsed.component("BIOS.Setup.1-1").unwrap().value("AssetTag"),
            Some("x<y>")
        );
    }

    #[test]
    fn tolerates_xml_declaration_and_self_closing() {
        let input = "<?xml version=\"1.0\"?>\n<SystemConfiguration>\n  <Component FQDD=\"NIC.Integrated.1-1-1\">\n    <Attribute Name=\"VirtMacAddr\"/>\n  </Component>\n</SystemConfiguration>";
        let doc = Document::parse(input).unwrap();
        let nic = doc.component("NIC.Integrated.1-1-1").unwrap();
        assert_eq!(nic.value("VirtMacAddr"), Some(""));
    }

    #[test]
    fn parse_error_reports_offset() {
        let err = Document::parse("<SystemConfiguration><Bogus/></SystemConfiguration>").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
