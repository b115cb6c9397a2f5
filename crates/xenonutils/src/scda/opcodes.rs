//! Opcode-to-name tables for the SCDA decompiler
//!
//! The built-in table seeds the common Fallout engine functions; an
//! extended table can be merged in from a `code,name` CSV dumped out of the
//! construction kit. The table is built once and then only read, so the
//! decompiler borrows it immutably.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

use crate::{Result, XenonError};

/// Begin-block mode names, indexed by mode value
const BLOCK_TYPES: &[&str] = &[
    "GameMode",
    "MenuMode",
    "OnActivate",
    "OnAdd",
    "OnDrop",
    "OnEquip",
    "OnUnequip",
    "OnDeath",
    "OnMurder",
    "OnCombatEnd",
    "OnHit",
    "OnHitWith",
    "OnPackageStart",
    "OnPackageDone",
    "OnPackageChange",
    "OnLoad",
    "OnMagicEffectHit",
    "OnSell",
    "OnTrigger",
    "OnStartCombat",
    "OnTriggerEnter",
    "OnTriggerLeave",
    "OnActorEquip",
    "OnActorUnequip",
    "OnReset",
    "OnOpen",
    "OnClose",
    "OnGrab",
    "OnRelease",
    "OnDestructionStageChange",
    "OnFire",
    "SayToDone",
    "ScriptEffectStart",
    "ScriptEffectUpdate",
    "ScriptEffectFinish",
];

/// Built-in function opcodes
const BUILTIN_FUNCTIONS: &[(u16, &str)] = &[
    (0x1001, "GetDistance"),
    (0x1002, "AddItem"),
    (0x1006, "GetPos"),
    (0x1007, "SetPos"),
    (0x1008, "GetAngle"),
    (0x1009, "SetAngle"),
    (0x100A, "GetStartingPos"),
    (0x100B, "MoveTo"),
    (0x1010, "StartCombat"),
    (0x1011, "StopCombat"),
    (0x1012, "GetSecondsPassed"),
    (0x1013, "Activate"),
    (0x1014, "GetActorValue"),
    (0x1015, "SetActorValue"),
    (0x1016, "ModActorValue"),
    (0x1018, "GetItemCount"),
    (0x101B, "GetDead"),
    (0x1020, "Enable"),
    (0x1021, "Disable"),
    (0x1022, "GetDisabled"),
    (0x1027, "PlaySound"),
    (0x102E, "GetQuestRunning"),
    (0x102F, "StartQuest"),
    (0x1030, "StopQuest"),
    (0x103A, "GetStage"),
    (0x103B, "GetStageDone"),
    (0x103D, "SetStage"),
    (0x1041, "GetLocked"),
    (0x1042, "Lock"),
    (0x1043, "Unlock"),
    (0x1049, "GetIsID"),
    (0x104C, "GetInCell"),
    (0x1053, "RemoveItem"),
    (0x1060, "GetActionRef"),
    (0x1066, "ShowMessage"),
    (0x106E, "GetHealth"),
    (0x1075, "PlaceAtMe"),
    (0x1082, "GetScriptVariable"),
    (0x109E, "Kill"),
    (0x10BB, "AddSpell"),
    (0x10BC, "RemoveSpell"),
];

/// Immutable opcode registry, built at startup and shared by reference
#[derive(Debug, Clone)]
pub struct OpcodeTable {
    functions: HashMap<u16, String>,
}

impl OpcodeTable {
    /// The built-in Fallout function set
    pub fn builtin() -> Self {
        Self {
            functions: BUILTIN_FUNCTIONS
                .iter()
                .map(|(code, name)| (*code, (*name).to_string()))
                .collect(),
        }
    }

    /// Merge a `code,name` CSV into the table. Codes may be decimal or
    /// `0x`-prefixed hex; blank lines and `#` comments are skipped; later
    /// entries win.
    pub fn with_csv(mut self, reader: impl Read) -> Result<Self> {
        for (line_no, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (code, name) = line.split_once(',').ok_or_else(|| {
                XenonError::ParseError(format!("opcode CSV line {}: missing comma", line_no + 1))
            })?;
            let code = code.trim();
            let parsed = match code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")) {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => code.parse(),
            }
            .map_err(|_| {
                XenonError::ParseError(format!(
                    "opcode CSV line {}: bad code {:?}",
                    line_no + 1,
                    code
                ))
            })?;
            self.functions.insert(parsed, name.trim().to_string());
        }
        Ok(self)
    }

    /// Name for a function opcode, when known
    pub fn function_name(&self, opcode: u16) -> Option<&str> {
        self.functions.get(&opcode).map(String::as_str)
    }

    /// Display name for a Begin-block mode
    pub fn block_type_name(mode: u16) -> String {
        BLOCK_TYPES
            .get(mode as usize)
            .map(|name| (*name).to_string())
            .unwrap_or_else(|| format!("Block{mode}"))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_seeds_common_functions() {
        let table = OpcodeTable::builtin();
        assert_eq!(table.function_name(0x103A), Some("GetStage"));
        assert_eq!(table.function_name(0x1020), Some("Enable"));
        assert_eq!(table.function_name(0x0FFF), None);
    }

    #[test]
    fn block_type_names() {
        assert_eq!(OpcodeTable::block_type_name(0), "GameMode");
        assert_eq!(OpcodeTable::block_type_name(1), "MenuMode");
        assert_eq!(OpcodeTable::block_type_name(18), "OnTrigger");
        assert_eq!(OpcodeTable::block_type_name(999), "Block999");
    }

    #[test]
    fn csv_merge_overrides_and_extends() {
        let csv = "# custom functions\n0x2FFF,GetOwnersFaction\n4097,GetLinearDistance\n";
        let table = OpcodeTable::builtin().with_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.function_name(0x2FFF), Some("GetOwnersFaction"));
        // 4097 == 0x1001, overriding the builtin name
        assert_eq!(table.function_name(0x1001), Some("GetLinearDistance"));
    }

    #[test]
    fn csv_rejects_garbage() {
        assert!(OpcodeTable::builtin().with_csv("no-comma-here".as_bytes()).is_err());
        assert!(OpcodeTable::builtin().with_csv("zz,Name".as_bytes()).is_err());
    }
}
