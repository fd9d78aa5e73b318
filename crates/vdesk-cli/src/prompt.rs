use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};

pub const MAX_PROMPT_ATTEMPTS: u32 = 3;

/// Resolves how many instance slots the run addresses. An explicit value
/// wins; otherwise the operator is asked on the console. Values outside
/// `1..=max_instances` are rejected either way.
pub fn resolve_total_instances(
    flag_value: Option<u32>,
    max_instances: u32,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<u32> {
    if let Some(total) = flag_value {
        if total == 0 {
            bail!("total instances must be at least 1");
        }
        if total > max_instances {
            bail!("total instances {total} exceeds the configured maximum {max_instances}");
        }
        return Ok(total);
    }
    for _ in 0..MAX_PROMPT_ATTEMPTS {
        write!(output, "Instances to provision (1-{max_instances}): ")
            .context("failed to write console prompt")?;
        output.flush().context("failed to flush console prompt")?;
        let mut line = String::new();
        let bytes_read = input
            .read_line(&mut line)
            .context("failed to read console input")?;
        if bytes_read == 0 {
            bail!("console input closed before an instance count was entered");
        }
        match line.trim().parse::<u32>() {
            Ok(total) if (1..=max_instances).contains(&total) => return Ok(total),
            Ok(total) => {
                writeln!(output, "{total} is out of range.")
                    .context("failed to write console prompt")?;
            }
            Err(_) => {
                writeln!(output, "Enter a whole number.")
                    .context("failed to write console prompt")?;
            }
        }
    }
    bail!("no valid instance count after {MAX_PROMPT_ATTEMPTS} attempts");
}
