//! Assembly declarations read from the `rtserver_data` geometry source.
//!
//! The source is text, one declaration per line:
//!
//! ```text
//! top {all}
//! hull_asm {hull} key_pt {0 0 0} zrotate {90 -90 0} children {turret_asm}
//! turret_asm {turret} key_pt {5 0 0} ytranslate {2 -2} xtranslate {}
//! ```
//!
//! Each line is a brace-delimited word list: the assembly name, its member
//! objects, then key/value pairs. Rotation limits are written
//! `max min initial` in degrees, translation limits `max min` with an empty
//! value meaning unlimited.

use std::collections::HashMap;

use rtserver_math::Point3;
use tracing::warn;

use crate::error::{Result, ServerError};

/// Names that mark the top assembly.
pub const TOP_NAMES: [&str; 2] = ["top", "rtserver_tops"];

/// Rotation range of one axis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationLimit {
    /// Smallest angle.
    pub min: f64,
    /// Largest angle.
    pub max: f64,
    /// Angle used when none is requested.
    pub initial: f64,
}

/// Translation range of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TranslationLimit {
    /// Any offset allowed.
    #[default]
    Unlimited,
    /// Offsets within `[min, max]`.
    Range {
        /// Smallest offset.
        min: f64,
        /// Largest offset.
        max: f64,
    },
}

impl TranslationLimit {
    /// Offset used when none is requested: zero, pulled into range.
    pub fn default_offset(&self) -> f64 {
        match *self {
            Self::Unlimited => 0.0,
            Self::Range { min, max } => 0.0f64.clamp(min, max),
        }
    }
}

/// One declared assembly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assembly {
    /// Assembly name.
    pub name: String,
    /// Database objects making up the assembly, in order.
    pub members: Vec<String>,
    /// Pivot for rotations.
    pub key_point: Option<Point3>,
    /// Rotation limits about x, y and z; `None` means the axis is fixed.
    pub rotate: [Option<RotationLimit>; 3],
    /// Translation limits along x, y and z.
    pub translate: [TranslationLimit; 3],
    /// Child assemblies.
    pub children: Vec<String>,
}

impl Assembly {
    /// Whether this is the top assembly.
    pub fn is_top(&self) -> bool {
        TOP_NAMES.contains(&self.name.as_str())
    }
}

/// Split one line into Tcl list words.
///
/// Braces group words and may nest; the outer pair is stripped. Double
/// quotes group words too. A backslash escapes the next character outside
/// braces.
pub fn split_list(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(c) = chars.next() else { break };

        let mut word = String::new();
        match c {
            '{' => {
                let mut depth = 1;
                loop {
                    match chars.next() {
                        Some('{') => {
                            depth += 1;
                            word.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            word.push('}');
                        }
                        Some(ch) => word.push(ch),
                        None => return Err("unbalanced braces".into()),
                    }
                }
                if chars.peek().is_some_and(|ch| !ch.is_whitespace()) {
                    return Err("extra characters after close-brace".into());
                }
            }
            '"' => loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => word.extend(chars.next()),
                    Some(ch) => word.push(ch),
                    None => return Err("unterminated quote".into()),
                }
            },
            _ => {
                let mut cur = Some(c);
                while let Some(ch) = cur {
                    if ch == '\\' {
                        word.extend(chars.next());
                    } else {
                        word.push(ch);
                    }
                    cur = chars.next_if(|ch| !ch.is_whitespace());
                }
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn numbers(line: usize, key: &str, value: &str) -> Result<Vec<f64>> {
    let words = split_list(value).map_err(|reason| ServerError::Parse { line, reason })?;
    words
        .iter()
        .map(|w| match w.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(ServerError::Parse {
                line,
                reason: format!("{key}: {w:?} is not a finite number"),
            }),
        })
        .collect()
}

fn expect_len(line: usize, key: &str, values: &[f64], n: usize) -> Result<()> {
    if values.len() == n {
        Ok(())
    } else {
        Err(ServerError::Parse {
            line,
            reason: format!("{key} takes {n} numbers, got {}", values.len()),
        })
    }
}

fn axis_of(key: &str, suffix: &str) -> Option<usize> {
    let prefix = key.strip_suffix(suffix)?;
    match prefix {
        "x" => Some(0),
        "y" => Some(1),
        "z" => Some(2),
        _ => None,
    }
}

fn parse_line(line: usize, text: &str) -> Result<Assembly> {
    let words = split_list(text).map_err(|reason| ServerError::Parse { line, reason })?;
    let [name, members, pairs @ ..] = words.as_slice() else {
        return Err(ServerError::Parse {
            line,
            reason: "expected an assembly name and a member list".into(),
        });
    };
    if pairs.len() % 2 != 0 {
        return Err(ServerError::Parse {
            line,
            reason: format!("key {:?} has no value", pairs[pairs.len() - 1]),
        });
    }

    let mut asm = Assembly {
        name: name.clone(),
        members: split_list(members).map_err(|reason| ServerError::Parse { line, reason })?,
        ..Assembly::default()
    };

    for pair in pairs.chunks_exact(2) {
        let (key, value) = (pair[0].as_str(), pair[1].as_str());
        if key == "key_pt" {
            let v = numbers(line, key, value)?;
            expect_len(line, key, &v, 3)?;
            asm.key_point = Some(Point3::new(v[0], v[1], v[2]));
        } else if key == "children" {
            asm.children = split_list(value).map_err(|reason| ServerError::Parse { line, reason })?;
        } else if let Some(axis) = axis_of(key, "rotate") {
            let v = numbers(line, key, value)?;
            expect_len(line, key, &v, 3)?;
            let (max, min, initial) = (v[0], v[1], v[2]);
            if min > max || initial < min || initial > max {
                return Err(ServerError::Parse {
                    line,
                    reason: format!("{key}: initial {initial} outside [{min}, {max}]"),
                });
            }
            asm.rotate[axis] = Some(RotationLimit { min, max, initial });
        } else if let Some(axis) = axis_of(key, "translate") {
            let v = numbers(line, key, value)?;
            asm.translate[axis] = match v.as_slice() {
                [] => TranslationLimit::Unlimited,
                &[max, min] if min <= max => TranslationLimit::Range { min, max },
                _ => {
                    return Err(ServerError::Parse {
                        line,
                        reason: format!("{key} takes \"max min\" or nothing"),
                    })
                }
            };
        } else {
            warn!(line, assembly = %asm.name, key, "unknown rtserver_data key ignored");
        }
    }
    Ok(asm)
}

/// Parse the whole geometry source. Blank lines are skipped.
pub fn parse_rtserver_data(text: &str) -> Result<Vec<Assembly>> {
    text.split(['\n', '\0'])
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| parse_line(i + 1, l))
        .collect()
}

/// A validated set of assemblies.
#[derive(Debug, Clone)]
pub struct AssemblySet {
    assemblies: Vec<Assembly>,
    by_name: HashMap<String, usize>,
    parent: Vec<Option<usize>>,
    top: usize,
}

impl AssemblySet {
    /// Check a parsed declaration list.
    ///
    /// Requires exactly one top, non-empty member lists, declared children,
    /// at most one parent per assembly and no cycles.
    pub fn validate(assemblies: Vec<Assembly>) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut top = None;
        for (i, asm) in assemblies.iter().enumerate() {
            if asm.members.is_empty() {
                return Err(ServerError::EmptyAssembly(asm.name.clone()));
            }
            if by_name.insert(asm.name.clone(), i).is_some() {
                return Err(ServerError::Parse {
                    line: i + 1,
                    reason: format!("assembly {} declared twice", asm.name),
                });
            }
            if asm.is_top() && top.replace(i).is_some() {
                return Err(ServerError::DuplicateTop);
            }
        }
        let top = top.ok_or(ServerError::MissingTop)?;

        let mut parent: Vec<Option<usize>> = vec![None; assemblies.len()];
        for (i, asm) in assemblies.iter().enumerate() {
            for child in &asm.children {
                let c = *by_name
                    .get(child)
                    .ok_or_else(|| ServerError::UnknownAssembly(child.clone()))?;
                if c == i {
                    return Err(ServerError::CyclicChildren(child.clone()));
                }
                if let Some(p) = parent[c] {
                    if p != i {
                        return Err(ServerError::MultipleParents {
                            child: child.clone(),
                            first: assemblies[p].name.clone(),
                            second: asm.name.clone(),
                        });
                    }
                }
                parent[c] = Some(i);
            }
        }

        // With one parent each, a cycle shows up as a parent chain longer
        // than the number of assemblies.
        for start in 0..assemblies.len() {
            let mut cur = start;
            let mut steps = 0;
            while let Some(p) = parent[cur] {
                steps += 1;
                if steps > assemblies.len() {
                    return Err(ServerError::CyclicChildren(assemblies[start].name.clone()));
                }
                cur = p;
            }
        }

        Ok(Self {
            assemblies,
            by_name,
            parent,
            top,
        })
    }

    /// Parse and validate geometry source text.
    pub fn parse(text: &str) -> Result<Self> {
        Self::validate(parse_rtserver_data(text)?)
    }

    /// The top assembly.
    pub fn top(&self) -> &Assembly {
        &self.assemblies[self.top]
    }

    /// Look up an assembly by name.
    pub fn get(&self, name: &str) -> Option<&Assembly> {
        self.by_name.get(name).map(|&i| &self.assemblies[i])
    }

    /// Index of an assembly.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Parent index of the assembly at `idx`.
    pub fn parent_of(&self, idx: usize) -> Option<usize> {
        self.parent.get(idx).copied().flatten()
    }

    /// All assemblies in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Assembly> {
        self.assemblies.iter()
    }

    /// Number of assemblies.
    pub fn len(&self) -> usize {
        self.assemblies.len()
    }

    /// Never true for a validated set, which always holds a top.
    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
top {all}
hull_asm {hull} key_pt {0 0 0} zrotate {90 -90 0} children {turret_asm}
turret_asm {turret {gun barrel}} key_pt {5 0 0} ytranslate {2 -2} xtranslate {} colour red
";

    #[test]
    fn test_split_list_nesting() {
        let words = split_list("a {b {c d}} \"e f\" g\\ h").unwrap();
        assert_eq!(words, vec!["a", "b {c d}", "e f", "g h"]);
        assert_eq!(split_list("  ").unwrap(), Vec::<String>::new());
        assert!(split_list("a {b").is_err());
    }

    #[test]
    fn test_parse_source() {
        let asms = parse_rtserver_data(SOURCE).unwrap();
        assert_eq!(asms.len(), 3);
        assert!(asms[0].is_top());
        assert_eq!(asms[0].members, vec!["all"]);

        let hull = &asms[1];
        assert_eq!(hull.key_point, Some(Point3::origin()));
        assert_eq!(
            hull.rotate[2],
            Some(RotationLimit { min: -90.0, max: 90.0, initial: 0.0 })
        );
        assert_eq!(hull.rotate[0], None);
        assert_eq!(hull.children, vec!["turret_asm"]);

        let turret = &asms[2];
        assert_eq!(turret.members, vec!["turret", "gun barrel"]);
        assert_eq!(turret.translate[0], TranslationLimit::Unlimited);
        assert_eq!(turret.translate[1], TranslationLimit::Range { min: -2.0, max: 2.0 });
    }

    #[test]
    fn test_legacy_tops_line() {
        let set = AssemblySet::parse("rtserver_tops {a.r b.r}\n").unwrap();
        assert_eq!(set.top().name, "rtserver_tops");
        assert_eq!(set.top().members, vec!["a.r", "b.r"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_rtserver_data("top {a} zrotate {1 2}"),
            Err(ServerError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse_rtserver_data("top {a}\nx {b} key_pt"),
            Err(ServerError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse_rtserver_data("top {a} xrotate {10 -10 20}"),
            Err(ServerError::Parse { .. })
        ));
        assert!(matches!(
            parse_rtserver_data("top {a} key_pt {1 two 3}"),
            Err(ServerError::Parse { .. })
        ));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for src in [
            "top {a}\nb {b} zrotate {NaN -90 0}",
            "top {a}\nb {b} ytranslate {2 -inf}",
            "top {a}\nb {b} key_pt {0 nan 0}",
        ] {
            assert!(matches!(
                parse_rtserver_data(src),
                Err(ServerError::Parse { line: 2, .. })
            ));
        }
    }

    #[test]
    fn test_validate_set() {
        let set = AssemblySet::parse(SOURCE).unwrap();
        assert_eq!(set.len(), 3);
        let turret = set.index_of("turret_asm").unwrap();
        assert_eq!(set.parent_of(turret), set.index_of("hull_asm"));
        assert_eq!(set.parent_of(0), None);
    }

    #[test]
    fn test_validate_failures() {
        assert!(matches!(AssemblySet::parse("a {x}\n"), Err(ServerError::MissingTop)));
        assert!(matches!(
            AssemblySet::parse("top {x}\nrtserver_tops {y}\n"),
            Err(ServerError::DuplicateTop)
        ));
        assert!(matches!(
            AssemblySet::parse("top {}\n"),
            Err(ServerError::EmptyAssembly(_))
        ));
        assert!(matches!(
            AssemblySet::parse("top {x} children {ghost}\n"),
            Err(ServerError::UnknownAssembly(name)) if name == "ghost"
        ));
        assert!(matches!(
            AssemblySet::parse("top {x}\na {y} children {b}\nb {z} children {a}\n"),
            Err(ServerError::CyclicChildren(_))
        ));
        assert!(matches!(
            AssemblySet::parse("top {x} children {c}\na {y} children {c}\nc {z}\n"),
            Err(ServerError::MultipleParents { .. })
        ));
    }
}
