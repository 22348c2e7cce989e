//! MEI reader: builds an [`ElementTree`] from the subset of MEI the layout
//! engine understands.
//!
//! Staff definitions come from `scoreDef`; every `measure` becomes a root of
//! the tree. Elements the reader does not know are skipped with a warning.

use std::collections::HashMap;

use roxmltree::{Document, Node};

use crate::error::{LayoutError, Result};
use crate::model::*;
use crate::tree::ElementTree;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

const EDITORIAL: [&str; 8] = ["app", "choice", "orig", "reg", "sic", "corr", "rdg", "lem"];

/// Parse an MEI document.
pub fn parse_mei(xml: &str) -> Result<ElementTree> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if !matches!(root.tag_name().name(), "mei" | "music" | "score" | "section" | "measure") {
        return Err(LayoutError::UnsupportedDocument(format!(
            "unexpected root element '{}'",
            root.tag_name().name()
        )));
    }

    let staff_defs = read_staff_defs(root);
    let mut tree = ElementTree::new();
    let measures: Vec<Node> = root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "measure")
        .collect();
    if measures.is_empty() {
        return Err(LayoutError::UnsupportedDocument("no measure found".to_string()));
    }

    for node in measures {
        let measure = tree.add_root(with_id(Element::new(ElementData::Measure), node));
        for (i, staff_node) in elements(node).filter(|n| n.tag_name().name() == "staff").enumerate() {
            let n = parse_attr(staff_node, "n").unwrap_or(i as u32 + 1);
            let attrs = staff_defs.get(&n).cloned().unwrap_or(StaffAttrs {
                n,
                ..Default::default()
            });
            let staff = tree.add_child(measure, with_id(Element::new(ElementData::Staff(attrs)), staff_node))?;
            for layer_node in elements(staff_node).filter(|n| n.tag_name().name() == "layer") {
                let layer = tree.add_child(staff, with_id(Element::new(ElementData::Layer), layer_node))?;
                read_children(&mut tree, layer, layer_node);
            }
        }
    }
    log::debug!("Read {} measure(s)", tree.roots().len());
    Ok(tree)
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn parse_attr<T: std::str::FromStr>(node: Node, name: &str) -> Option<T> {
    node.attribute(name).and_then(|v| v.trim().parse().ok())
}

fn with_id(element: Element, node: Node) -> Element {
    match node.attribute((XML_NS, "id")) {
        Some(id) => element.with_xml_id(id),
        None => element,
    }
}

// ── Staff definitions ───────────────────────────────────────────────

fn read_staff_defs(root: Node) -> HashMap<u32, StaffAttrs> {
    let mut defs = HashMap::new();
    for node in root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "staffDef")
    {
        let Some(n) = parse_attr::<u32>(node, "n") else {
            log::warn!("staffDef without @n");
            continue;
        };
        let mut attrs = StaffAttrs {
            n,
            ..Default::default()
        };
        if let Some(clef) = read_clef(node, "clef.shape", "clef.line") {
            attrs.clef = clef;
        }
        if let Some(clef) = elements(node)
            .find(|c| c.tag_name().name() == "clef")
            .and_then(|c| read_clef(c, "shape", "line"))
        {
            attrs.clef = clef;
        }
        if let Some(scale) = node.attribute("scale") {
            match scale.trim_end_matches('%').parse::<i32>() {
                Ok(size) if size > 0 => attrs.size = size,
                _ => log::warn!("Ignoring staff scale '{scale}'"),
            }
        }
        defs.insert(n, attrs);
    }
    defs
}

fn read_clef(node: Node, shape_attr: &str, line_attr: &str) -> Option<Clef> {
    let shape = match node.attribute(shape_attr)? {
        "G" => ClefShape::G,
        "F" => ClefShape::F,
        "C" => ClefShape::C,
        other => {
            log::warn!("Unsupported clef shape '{other}'");
            return None;
        }
    };
    let line = parse_attr(node, line_attr).unwrap_or(match shape {
        ClefShape::G => 2,
        ClefShape::F => 4,
        ClefShape::C => 3,
    });
    Some(Clef { shape, line })
}

// ── Layer content ───────────────────────────────────────────────────

fn read_children(tree: &mut ElementTree, parent: ElementId, node: Node) {
    for child in elements(node) {
        read_element(tree, parent, child);
    }
}

/// Read one element and its content. Elements the parent does not accept
/// are dropped with their content.
fn read_element(tree: &mut ElementTree, parent: ElementId, node: Node) {
    let name = node.tag_name().name();
    let data = match name {
        "note" => ElementData::Note(read_note(node)),
        "chord" => ElementData::Chord(read_timing(node)),
        "rest" => ElementData::Rest(read_timing(node)),
        "space" => ElementData::Space(read_timing(node)),
        "tabGrp" => ElementData::TabGrp(read_timing(node)),
        "beam" => ElementData::Beam(read_beam(node)),
        "fTrem" => ElementData::FTrem(read_beam(node)),
        "bTrem" => ElementData::BTrem,
        "tuplet" => ElementData::Tuplet(read_tuplet(node)),
        "clef" => match read_clef(node, "shape", "line") {
            Some(clef) => ElementData::Clef(clef),
            None => return,
        },
        "artic" => ElementData::Artic(ArticAttrs {
            artic: node.attribute("artic").unwrap_or_default().to_string(),
            place: node.attribute("place").and_then(StaffRel::from_mei),
        }),
        "accid" => match node.attribute("accid").and_then(Accidental::from_mei) {
            Some(accid) => ElementData::Accid(accid),
            // Gestural only, nothing to draw
            None => return,
        },
        // Drawn parts are created by the layout
        "dot" | "dots" | "stem" | "flag" => return,
        n if EDITORIAL.contains(&n) => ElementData::Editorial,
        other => {
            log::warn!("Skipping unsupported element <{other}>");
            return;
        }
    };

    let Ok(id) = tree.add_child(parent, with_id(Element::new(data), node)) else {
        return;
    };

    if name == "note" {
        read_note_attributes_as_children(tree, id, node);
    }
    if name == "chord" {
        if let Some(artic) = node.attribute("artic") {
            add_artics(tree, id, artic);
        }
    }
    read_children(tree, id, node);
}

fn read_timing(node: Node) -> DurationAttrs {
    DurationAttrs {
        dur: node.attribute("dur").and_then(Duration::from_mei),
        dots: parse_attr(node, "dots").unwrap_or(0),
        stem_dir: node.attribute("stem.dir").map_or(StemDirection::None, StemDirection::from_mei),
        breaksec: parse_attr(node, "breaksec"),
        grace: node.attribute("grace").is_some(),
        cue: node.attribute("cue") == Some("true"),
        staff: parse_attr(node, "staff"),
    }
}

fn read_note(node: Node) -> NoteAttrs {
    let pitch = match (
        node.attribute("pname").and_then(PitchName::from_mei),
        parse_attr::<i32>(node, "oct"),
    ) {
        (Some(pname), Some(oct)) => Some(Pitch::new(pname, oct)),
        _ => None,
    };
    NoteAttrs {
        timing: read_timing(node),
        pitch,
        loc: parse_attr(node, "loc"),
    }
}

/// `@accid` and `@artic` on a note become children, like their element forms.
fn read_note_attributes_as_children(tree: &mut ElementTree, note: ElementId, node: Node) {
    let has_accid_child = elements(node).any(|c| c.tag_name().name() == "accid");
    if !has_accid_child {
        if let Some(accid) = node.attribute("accid").and_then(Accidental::from_mei) {
            if let Err(e) = tree.add_child(note, Element::new(ElementData::Accid(accid))) {
                log::warn!("Dropping @accid of note {}: {e}", note.index());
            }
        }
    }
    if let Some(artic) = node.attribute("artic") {
        add_artics(tree, note, artic);
    }
}

fn add_artics(tree: &mut ElementTree, parent: ElementId, value: &str) {
    for name in value.split_whitespace() {
        let artic = Element::new(ElementData::Artic(ArticAttrs {
            artic: name.to_string(),
            place: None,
        }));
        if let Err(e) = tree.add_child(parent, artic) {
            log::warn!("Dropping @artic '{name}' of element {}: {e}", parent.index());
        }
    }
}

fn read_beam(node: Node) -> BeamAttrs {
    BeamAttrs {
        place: node.attribute("place").and_then(BeamPlace::from_mei),
        cue: node.attribute("cue") == Some("true"),
    }
}

fn read_tuplet(node: Node) -> TupletAttrs {
    let visible = |name: &str| node.attribute(name).map(|v| v == "true");
    TupletAttrs {
        num: parse_attr(node, "num"),
        numbase: parse_attr(node, "numbase"),
        bracket_visible: visible("bracket.visible"),
        num_visible: visible("num.visible"),
        bracket_place: node.attribute("bracket.place").and_then(StaffRel::from_mei),
        num_place: node.attribute("num.place").and_then(StaffRel::from_mei),
        staff: parse_attr(node, "staff"),
    }
}
