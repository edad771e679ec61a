//! `we disasm`: print one instruction per line

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use we_engine::disassemble;

pub fn execute(path: &Path) -> anyhow::Result<()> {
    let code =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render(&code, &mut out)
}

fn render(code: &[u8], out: &mut impl Write) -> anyhow::Result<()> {
    let listing = disassemble(code).context("Failed to disassemble program")?;
    for instruction in listing {
        writeln!(out, "{}", instruction)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_listing() {
        // num 2; num 3; mul; hlt
        let mut out = Vec::new();
        render(&[0x01, 2, 0x01, 3, 0x0B, 0x15], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "0000  num 2\n0002  num 3\n0004  mul\n0005  hlt\n"
        );
    }

    #[test]
    fn test_render_rejects_truncated() {
        let mut out = Vec::new();
        assert!(render(&[0x02, 0x00], &mut out).is_err());
    }
}
