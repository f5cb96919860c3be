//! Resource quantity normalization
//!
//! CPU is expressed in millicores and memory in MiB.

const MIB: f64 = 1024.0 * 1024.0;

fn split_suffix<'a>(quantity: &'a str, suffixes: &[&'a str]) -> (&'a str, &'a str) {
    for suffix in suffixes {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return (number, suffix);
        }
    }
    (quantity, "")
}

fn parse_number(number: &str) -> Option<f64> {
    number.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a quantity of either kind.
///
/// `n` and `m` are CPU suffixes converted to millicores, `Ki`/`Mi`/`Gi` are
/// converted to MiB, and a bare number is taken as bytes.
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let (number, suffix) = split_suffix(quantity, &["Ki", "Mi", "Gi", "n", "m"]);
    let value = parse_number(number)?;
    Some(match suffix {
        "n" => value / 1_000_000.0,
        "m" => value,
        "Ki" => value / 1024.0,
        "Mi" => value,
        "Gi" => value * 1024.0,
        _ => value / MIB,
    })
}

/// CPU quantity in millicores; a bare number counts cores
pub fn cpu_millicores(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let (number, suffix) = split_suffix(quantity, &["n", "u", "m"]);
    let value = parse_number(number)?;
    Some(match suffix {
        "n" => value / 1_000_000.0,
        "u" => value / 1_000.0,
        "m" => value,
        _ => value * 1000.0,
    })
}

/// Memory quantity in MiB; a bare number counts bytes
pub fn memory_mib(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let (number, suffix) =
        split_suffix(quantity, &["Ki", "Mi", "Gi", "Ti", "k", "M", "G", "T"]);
    let value = parse_number(number)?;
    let bytes = match suffix {
        "Ki" => value * 1024.0,
        "Mi" => value * MIB,
        "Gi" => value * MIB * 1024.0,
        "Ti" => value * MIB * MIB,
        "k" => value * 1e3,
        "M" => value * 1e6,
        "G" => value * 1e9,
        "T" => value * 1e12,
        _ => value,
    };
    Some(bytes / MIB)
}
