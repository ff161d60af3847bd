//! Report columns projected out of UniProt entry XML.
//!
//! A column is configured as a `xpath, subXpath, columnName` triplet. The
//! path language is a small subset of XPath that covers what UniProt
//! annotation columns need:
//!
//! - `/entry/comment/text` absolute steps, the first one naming the root
//! - `name` relative steps (used for the sub path)
//! - `*` any element
//! - `comment[@type='function']` or `dbReference[@type]` attribute predicates
//! - a final `@attr` step selecting attribute values
//! - a final `text()` step, equivalent to selecting the element itself

use crate::key::uniprot_accession;
use crate::Error;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationColumn {
    column_name: String,
    xpath: String,
    sub_xpath: String,
}

impl AnnotationColumn {
    pub fn new(column_name: &str, xpath: &str, sub_xpath: &str) -> Result<Self, Error> {
        let column = AnnotationColumn {
            column_name: column_name.trim().into(),
            xpath: xpath.trim().into(),
            sub_xpath: sub_xpath.trim().into(),
        };
        column.check()?;
        Ok(column)
    }

    fn check(&self) -> Result<(), Error> {
        let column = || format!("{}, {}, {}", self.xpath, self.sub_xpath, self.column_name);
        if self.xpath.is_empty() {
            return Err(Error::InvalidAnnotationColumn {
                column: column(),
                reason: "the xpath cannot be empty",
            });
        }
        if self.column_name.is_empty() {
            return Err(Error::InvalidAnnotationColumn {
                column: column(),
                reason: "the column name cannot be empty",
            });
        }
        Ok(())
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn xpath(&self) -> &str {
        &self.xpath
    }

    pub fn sub_xpath(&self) -> &str {
        &self.sub_xpath
    }

    /// Values of this column for a protein. Entries are keyed by UniProt
    /// accession; proteins without an entry yield no values.
    pub fn values_for_protein<S: BuildHasher>(
        &self,
        accession: &str,
        entries: &HashMap<String, AnnotationEntry, S>,
    ) -> Vec<String> {
        uniprot_accession(accession)
            .and_then(|acc| entries.get(acc))
            .map(|entry| entry.query(&self.xpath, &self.sub_xpath))
            .unwrap_or_default()
    }
}

impl FromStr for AnnotationColumn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s.split(',').collect::<Vec<_>>();
        match fields.as_slice() {
            [xpath, sub_xpath, column_name] => AnnotationColumn::new(column_name, xpath, sub_xpath),
            _ => Err(Error::InvalidAnnotationColumn {
                column: s.into(),
                reason: "it must contain 3 elements separated by commas",
            }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(ev: &BytesStart) -> Result<Self, Error> {
        let attributes = ev
            .attributes()
            .map(|attr| {
                let attr = attr.map_err(quick_xml::Error::from)?;
                let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                Ok((key, attr.unescape_value()?.into_owned()))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Element {
            name: String::from_utf8_lossy(ev.local_name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Parse a document into its root element
    pub fn parse(xml: &str) -> Result<Self, Error> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(ev) => stack.push(Element::from_start(&ev)?),
                Event::Empty(ev) => {
                    let element = Element::from_start(&ev)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or(Error::MalformedXml("closing tag without an opening tag"))?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::MalformedXml("unclosed element"));
        }
        root.ok_or(Error::MalformedXml("document has no root element"))
    }

    /// Evaluate `path` from this element. An absolute path must name this
    /// element in its first step; a relative path starts at its children.
    fn evaluate(&self, path: &str) -> Selection<'_> {
        let path = path.trim();
        let (nodes, steps) = match path.strip_prefix('/') {
            Some(absolute) => {
                let steps = split_steps(absolute);
                match steps.split_first() {
                    Some((first, rest)) => {
                        let nodes = match Step::parse(first) {
                            Some(step) if step.matches(self) => vec![self],
                            _ => Vec::new(),
                        };
                        (nodes, rest.to_vec())
                    }
                    None => (vec![self], Vec::new()),
                }
            }
            None => (vec![self], split_steps(path)),
        };
        select(nodes, &steps)
    }

    /// String values selected by `path`
    pub fn values(&self, path: &str) -> Vec<String> {
        self.evaluate(path).into_values()
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

enum Selection<'a> {
    Elements(Vec<&'a Element>),
    Values(Vec<String>),
}

impl<'a> Selection<'a> {
    fn into_elements(self) -> Vec<&'a Element> {
        match self {
            Selection::Elements(elements) => elements,
            Selection::Values(_) => Vec::new(),
        }
    }

    fn into_values(self) -> Vec<String> {
        match self {
            Selection::Elements(elements) => elements
                .into_iter()
                .map(|e| e.text.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Selection::Values(values) => values,
        }
    }
}

/// Split on `/`, ignoring separators inside predicates
fn split_steps(path: &str) -> Vec<&str> {
    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                steps.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    steps.push(&path[start..]);
    steps
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

struct Step<'p> {
    name: &'p str,
    attribute: Option<(&'p str, Option<&'p str>)>,
}

impl<'p> Step<'p> {
    fn parse(step: &'p str) -> Option<Self> {
        let Some((name, predicate)) = step.split_once('[') else {
            return Some(Step {
                name: step,
                attribute: None,
            });
        };
        let predicate = predicate.strip_suffix(']')?.trim().strip_prefix('@')?;
        let attribute = match predicate.split_once('=') {
            Some((key, value)) => {
                let value = value.trim();
                let value = value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))?;
                (key.trim(), Some(value))
            }
            None => (predicate, None),
        };
        Some(Step {
            name: name.trim(),
            attribute: Some(attribute),
        })
    }

    fn matches(&self, element: &Element) -> bool {
        if self.name != "*" && self.name != element.name {
            return false;
        }
        match self.attribute {
            None => true,
            Some((key, None)) => element.attribute(key).is_some(),
            Some((key, Some(value))) => element.attribute(key) == Some(value),
        }
    }
}

fn select<'a>(mut nodes: Vec<&'a Element>, steps: &[&str]) -> Selection<'a> {
    for (i, step) in steps.iter().enumerate() {
        let last = i + 1 == steps.len();
        if let Some(attr) = step.strip_prefix('@') {
            if !last {
                return Selection::Elements(Vec::new());
            }
            let values = nodes
                .iter()
                .filter_map(|n| n.attribute(attr))
                .map(String::from)
                .collect();
            return Selection::Values(values);
        }
        if *step == "text()" {
            if !last {
                return Selection::Elements(Vec::new());
            }
            return Selection::Elements(nodes);
        }
        let Some(step) = Step::parse(step) else {
            return Selection::Elements(Vec::new());
        };
        nodes = nodes
            .iter()
            .flat_map(|n| n.children.iter())
            .filter(|c| step.matches(c))
            .collect();
    }
    Selection::Elements(nodes)
}

/// One UniProt `<entry>`
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationEntry {
    root: Element,
}

impl AnnotationEntry {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    pub fn parse(xml: &str) -> Result<Self, Error> {
        Element::parse(xml).map(Self::new)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// First `<accession>` of the entry
    pub fn primary_accession(&self) -> Option<&str> {
        self.root
            .children_named("accession")
            .map(|a| a.text.trim())
            .find(|a| !a.is_empty())
    }

    /// Values selected by `xpath`, or, with a non-empty `sub_xpath`, the
    /// values it selects relative to each element matched by `xpath`
    pub fn query(&self, xpath: &str, sub_xpath: &str) -> Vec<String> {
        let sub_xpath = sub_xpath.trim().trim_start_matches('/');
        if sub_xpath.is_empty() {
            return self.root.values(xpath);
        }
        self.root
            .evaluate(xpath)
            .into_elements()
            .into_iter()
            .flat_map(|e| e.values(sub_xpath))
            .collect()
    }
}

/// Parse a UniProt XML document (a single `<entry>` or an `<uniprot>` list of
/// them) into entries keyed by primary accession
pub fn parse_uniprot(xml: &str) -> Result<HashMap<String, AnnotationEntry>, Error> {
    let root = Element::parse(xml)?;
    let entries = if root.name == "entry" {
        vec![root]
    } else {
        root.children.into_iter().filter(|c| c.name == "entry").collect()
    };

    let mut map = HashMap::with_capacity(entries.len());
    for entry in entries.into_iter().map(AnnotationEntry::new) {
        match entry.primary_accession() {
            Some(acc) => {
                map.insert(acc.to_string(), entry);
            }
            None => log::warn!("skipping UniProt entry without accession"),
        }
    }
    log::debug!("parsed {} UniProt entries", map.len());
    Ok(map)
}

#[cfg(test)]
mod test {
    use super::*;

    const UNIPROT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<uniprot xmlns="http://uniprot.org/uniprot">
  <entry dataset="Swiss-Prot">
    <accession>P02768</accession>
    <accession>B2R7F8</accession>
    <name>ALBU_HUMAN</name>
    <gene>
      <name type="primary">ALB</name>
      <name type="synonym">GIG20</name>
    </gene>
    <comment type="function">
      <text evidence="1">Binds water, Ca(2+), Na(+) &amp; K(+).</text>
    </comment>
    <comment type="subcellular location">
      <subcellularLocation>
        <location>Secreted</location>
      </subcellularLocation>
    </comment>
    <dbReference type="GO" id="GO:0005615"/>
    <dbReference type="GO" id="GO:0072562"/>
    <dbReference type="PDB" id="1AO6"/>
  </entry>
  <entry dataset="TrEMBL">
    <accession>Q9XXX1</accession>
    <name>Q9XXX1_MOUSE</name>
  </entry>
</uniprot>"#;

    #[test]
    fn column_triplets() {
        let column: AnnotationColumn = "/entry/name, , Name".parse().unwrap();
        assert_eq!(column.column_name(), "Name");
        assert_eq!(column.xpath(), "/entry/name");
        assert_eq!(column.sub_xpath(), "");

        for bad in ["/entry/name,Name", "/entry/name", " , text, Function", "/entry, text, "] {
            assert!(
                matches!(
                    bad.parse::<AnnotationColumn>(),
                    Err(Error::InvalidAnnotationColumn { .. })
                ),
                "{}",
                bad
            );
        }
        assert!(AnnotationColumn::new("Gene", "/entry/gene/name", "").is_ok());
        assert!(AnnotationColumn::new(" ", "/entry/gene/name", "").is_err());
    }

    #[test]
    fn parse_tree() {
        let root = Element::parse("<a x='1'><b>one</b><b/><c><![CDATA[<raw>]]></c></a>").unwrap();
        assert_eq!(root.name, "a");
        assert_eq!(root.attribute("x"), Some("1"));
        assert_eq!(root.children.len(), 3);
        assert_eq!(root.children[0].text, "one");
        assert_eq!(root.children[2].text, "<raw>");

        assert!(Element::parse("<a><b></a>").is_err());
        assert!(Element::parse("").is_err());
    }

    #[test]
    fn path_queries() {
        let entries = parse_uniprot(UNIPROT).unwrap();
        assert_eq!(entries.len(), 2);
        let albumin = &entries["P02768"];

        assert_eq!(albumin.query("/entry/name", ""), vec!["ALBU_HUMAN"]);
        assert_eq!(albumin.query("/entry/name/text()", ""), vec!["ALBU_HUMAN"]);
        assert_eq!(albumin.query("/entry/gene/name", ""), vec!["ALB", "GIG20"]);
        assert_eq!(
            albumin.query("/entry/gene/name[@type='primary']", ""),
            vec!["ALB"]
        );
        assert_eq!(
            albumin.query("/entry/comment[@type='function']", "text"),
            vec!["Binds water, Ca(2+), Na(+) & K(+)."]
        );
        assert_eq!(
            albumin.query("/entry/comment[@type=\"subcellular location\"]", "*/location"),
            vec!["Secreted"]
        );
        assert_eq!(
            albumin.query("/entry/dbReference[@type='GO']", "@id"),
            vec!["GO:0005615", "GO:0072562"]
        );
        assert_eq!(albumin.query("/entry/@dataset", ""), vec!["Swiss-Prot"]);
        assert!(albumin.query("/uniprot/entry/name", "").is_empty());
        assert!(albumin.query("/entry/missing", "").is_empty());
    }

    #[test]
    fn values_for_protein() {
        let entries = parse_uniprot(UNIPROT).unwrap();
        let column: AnnotationColumn = "/entry/gene/name[@type='primary'], , Gene".parse().unwrap();
        assert_eq!(column.values_for_protein("sp|P02768|ALBU_HUMAN", &entries), vec!["ALB"]);
        assert!(column.values_for_protein("sp|P99999|NONE_HUMAN", &entries).is_empty());
        assert!(column.values_for_protein("not an accession", &entries).is_empty());
    }
}
