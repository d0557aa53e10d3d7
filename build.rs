use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use toml::{Table, Value};

/// Used when the crate is built without a `config.toml`.
const DEFAULT_CONFIG: &str = r#"
[errata.mips]
vendor_id = 0x127
errata = [{ name = "P8700_PAUSE_OPCODE" }]
"#;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=config.toml");

    let out_dir = env::var("OUT_DIR").unwrap();
    let out_path = Path::new(&out_dir);

    // Config parsing
    let config_str = fs::read_to_string("config.toml").unwrap_or_default();
    let root: Table = if !config_str.is_empty() {
        toml::from_str(&config_str).unwrap_or_else(|e| {
            println!("cargo:warning=Failed to parse config.toml: {}", e);
            default_config()
        })
    } else {
        default_config()
    };

    if let Some(arch_table) = root.get("arch").and_then(|v| v.as_table()) {
        for (key, value) in arch_table {
            if let Some(choice) = value.as_str() {
                println!("cargo:rustc-cfg={}=\"{}\"", key, choice);
            }
        }
    }

    let errata = root
        .get("errata")
        .and_then(|v| v.as_table())
        .cloned()
        .unwrap_or_default();

    let dest_path = out_path.join("errata_table.rs");
    fs::write(&dest_path, errata_table(&errata)).unwrap();
}

fn default_config() -> Table {
    toml::from_str(DEFAULT_CONFIG).unwrap()
}

/// Renders `[errata.<vendor>]` tables into a `VENDOR_ERRATA` static.
fn errata_table(errata: &Table) -> String {
    let mut out = String::new();
    out.push_str("pub static VENDOR_ERRATA: &[VendorErrata] = &[\n");

    for (vendor, value) in errata {
        let Some(table) = value.as_table() else {
            println!("cargo:warning=errata.{} is not a table, ignoring", vendor);
            continue;
        };
        let Some(vendor_id) = table.get("vendor_id").and_then(Value::as_integer) else {
            println!("cargo:warning=errata.{} has no vendor_id, ignoring", vendor);
            continue;
        };

        writeln!(out, "    VendorErrata {{").unwrap();
        writeln!(out, "        vendor: {:?},", vendor).unwrap();
        writeln!(out, "        vendor_id: {:#x},", vendor_id).unwrap();
        writeln!(out, "        errata: &[").unwrap();

        let entries = table
            .get("errata")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for entry in entries {
            let (name, archid, impids) = match &entry {
                Value::String(name) => (name.clone(), None, Vec::new()),
                Value::Table(t) => (
                    t.get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("UNNAMED")
                        .to_string(),
                    t.get("archid").and_then(csr_value),
                    t.get("impid")
                        .and_then(Value::as_array)
                        .map(|ids| ids.iter().filter_map(csr_value).collect())
                        .unwrap_or_default(),
                ),
                _ => {
                    println!("cargo:warning=errata.{}: malformed erratum entry", vendor);
                    continue;
                }
            };
            let archid = match archid {
                Some(id) => format!("Some({:#x})", id),
                None => "None".to_string(),
            };
            let impids = impids
                .iter()
                .map(|id| format!("{:#x}", id))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                out,
                "            Erratum {{ name: {:?}, archid: {}, impids: &[{}] }},",
                name, archid, impids
            )
            .unwrap();
        }

        writeln!(out, "        ],").unwrap();
        writeln!(out, "    }},").unwrap();
    }

    out.push_str("];\n");
    out
}

/// A CSR value: a TOML integer, or a hex string for values above `i64::MAX`
/// such as a full `marchid`.
fn csr_value(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(id) => u64::try_from(*id).ok(),
        Value::String(id) => {
            let digits = id.trim_start_matches("0x").replace('_', "");
            u64::from_str_radix(&digits, 16).ok()
        }
        _ => None,
    }
}
