use std::collections::BTreeSet;
use std::fmt;

/// Disks picked with `-i`: `1`, `0-2` (either order), `2-` (2 and above), `0,3,4`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiskSelection {
    #[default]
    All,
    From(u32),
    Range(u32, u32),
    Set(BTreeSet<u32>),
}

impl DiskSelection {
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("empty disk selection".to_string());
        }
        if let Some((start, end)) = value.split_once('-') {
            let start = number(start)?;
            if end.trim().is_empty() {
                return Ok(DiskSelection::From(start));
            }
            let end = number(end)?;
            return Ok(DiskSelection::Range(start.min(end), start.max(end)));
        }
        let set = value
            .split(',')
            .map(number)
            .collect::<Result<BTreeSet<u32>, String>>()?;
        Ok(DiskSelection::Set(set))
    }

    pub fn contains(&self, disk: u32) -> bool {
        match self {
            DiskSelection::All => true,
            DiskSelection::From(start) => disk >= *start,
            DiskSelection::Range(start, end) => (*start..=*end).contains(&disk),
            DiskSelection::Set(set) => set.contains(&disk),
        }
    }
}

impl fmt::Display for DiskSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskSelection::All => f.write_str("all"),
            DiskSelection::From(start) => write!(f, "{}-", start),
            DiskSelection::Range(start, end) => write!(f, "{}-{}", start, end),
            DiskSelection::Set(set) => {
                let parts: Vec<String> = set.iter().map(|n| n.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

fn number(text: &str) -> Result<u32, String> {
    let text = text.trim();
    text.parse::<u32>()
        .map_err(|_| format!("'{}' is not a disk number", text))
}

/// Decimal, or hex with a `0x` prefix.
pub fn parse_u32(value: &str) -> Result<u32, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|_| format!("'{}' is not a valid number", value))
}
