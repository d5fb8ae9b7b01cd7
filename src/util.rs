use std::cmp::Ordering;

/// Convert an epoch seconds string into milliseconds by appending digits.
///
/// Fractional seconds are padded or cut to millisecond resolution, no float
/// arithmetic is involved.
pub fn cast_seconds_to_ms(seconds: &str) -> String {
    match seconds.split_once('.') {
        Some((whole, fraction)) => {
            let mut millis: String = fraction.chars().take(3).collect();
            while millis.len() < 3 {
                millis.push('0');
            }
            format!("{whole}{millis}")
        }
        None => format!("{seconds}000"),
    }
}

/// Compare two dotted version strings numerically, segment by segment
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |version: &str| -> Vec<u64> {
        version
            .trim_start_matches(['v', 'V'])
            .split(['.', '-'])
            .map(|segment| {
                segment
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };

    let (left, right) = (parse(left), parse(right));
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub fn version_at_least(version: &str, minimum: &str) -> bool {
    compare_versions(version, minimum) != Ordering::Less
}
