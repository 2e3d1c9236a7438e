use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

const BUILTIN_DUNGEONS: &[(u32, &str)] = &[
    (247, "The MOTHERLODE!!"),
    (370, "Operation: Mechagon - Workshop"),
    (375, "Mists of Tirna Scithe"),
    (377, "De Other Side"),
    (378, "Halls of Atonement"),
    (379, "Plaguefall"),
    (380, "Sanguine Depths"),
    (381, "Spires of Ascension"),
    (382, "Theater of Pain"),
    (383, "Necrotic Wake"),
    (384, "Pit of Saron"),
    (385, "Halls of Reflection"),
    (386, "Forge of Souls"),
    (499, "Priory of the Sacred Flame"),
    (500, "The Rookery"),
    (504, "Darkflame Cleft"),
    (506, "Cinderbrew Meadery"),
    (525, "Operation: Floodgate"),
];

/// Dungeon id → display name.  Lookups never fail; unknown ids get a
/// placeholder carrying the id.
#[derive(Debug, Clone)]
pub struct DungeonCatalog {
    names: HashMap<u32, String>,
}

impl Default for DungeonCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DungeonCatalog {
    pub fn builtin() -> Self {
        Self {
            names: BUILTIN_DUNGEONS
                .iter()
                .map(|(id, name)| (*id, (*name).to_string()))
                .collect(),
        }
    }

    pub fn name(&self, id: u32) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| placeholder_name(id))
    }

    /// Overlay names parsed from an upstream table.  Existing ids are
    /// overwritten; ids absent upstream keep their built-in name.
    pub fn merge(&mut self, names: HashMap<u32, String>) -> usize {
        let count = names.len();
        self.names.extend(names);
        count
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn placeholder_name(id: u32) -> String {
    format!("Unknown ({id})")
}

fn dungeon_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"DUNGEON_TABLE\[(\d+)\]\s*=\s*L\["([^"]+)"\]"#).expect("static regex")
    })
}

/// Parse `DUNGEON_TABLE[id] = L["Name"]` lines from the addon's
/// `Dungeons.lua`.  Lines in any other shape are ignored.
pub fn parse_dungeon_table(lua: &str) -> HashMap<u32, String> {
    lua.lines()
        .filter_map(|line| {
            let caps = dungeon_line_re().captures(line)?;
            let id = caps[1].parse::<u32>().ok()?;
            Some((id, caps[2].to_string()))
        })
        .collect()
}
