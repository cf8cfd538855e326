//! Minimal ESC/POS framing for plain text jobs.

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;

/// Job formats sent to the device byte for byte.
const RAW_FORMATS: &[&str] = &["raw", "escpos"];

/// Builds the byte stream for one copy of a job.
pub fn render(content: &str, format: &str, paper_width_mm: u32) -> Vec<u8> {
    if RAW_FORMATS.iter().any(|f| f.eq_ignore_ascii_case(format)) {
        return content.as_bytes().to_vec();
    }

    let columns = columns_for_width(paper_width_mm);
    let mut out = Vec::with_capacity(content.len() + 16);
    out.extend_from_slice(&[ESC, b'@']);
    for line in content.split('\n') {
        let clean = sanitize_line(line);
        for chunk in wrap(&clean, columns) {
            out.extend_from_slice(chunk.as_bytes());
            out.push(b'\n');
        }
    }
    // Feed past the cutter, then partial cut.
    out.extend_from_slice(b"\n\n\n");
    out.extend_from_slice(&[GS, b'V', 66, 0]);
    out
}

/// Characters per line for the common thermal roll widths (Font A).
pub fn columns_for_width(paper_width_mm: u32) -> usize {
    match paper_width_mm {
        0..=58 => 32,
        59..=76 => 42,
        _ => 48,
    }
}

/// Keeps printable text and tabs. Known ESC sequences are consumed with
/// their parameter bytes; other control bytes are dropped.
fn sanitize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.next() {
                Some('!') => {
                    chars.next();
                }
                Some(_) | None => {}
            }
            continue;
        }
        if c == '\t' || !c.is_control() {
            out.push(c);
        }
    }
    out.trim_end().to_string()
}

fn wrap(line: &str, columns: usize) -> Vec<String> {
    if line.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars.chunks(columns).map(|c| c.iter().collect()).collect()
}
