use dossier_core::ResourceAdvisor;

/// Reads available system memory so the summarizer can start its model
/// ladder at a size the machine can actually load.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResourceAdvisor;

impl SystemResourceAdvisor {
    pub fn new() -> Self {
        Self
    }
}

fn parse_meminfo_available(meminfo: &str) -> Option<u64> {
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            // Format: "MemAvailable:    1234567 kB"
            let kb = rest.trim().split_whitespace().next()?;
            return kb.parse::<u64>().ok().map(|v| v * 1024);
        }
    }
    None
}

impl ResourceAdvisor for SystemResourceAdvisor {
    fn available_memory_bytes(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
            parse_meminfo_available(&meminfo)
        }
        #[cfg(not(target_os = "linux"))]
        {
            // No probe on this platform; callers treat None as "unknown" and
            // keep their default ladder order.
            None
        }
    }
}

/// Fixed-answer advisor for tests and manual overrides.
#[derive(Debug, Clone, Copy)]
pub struct StaticAdvisor(pub Option<u64>);

impl ResourceAdvisor for StaticAdvisor {
    fn available_memory_bytes(&self) -> Option<u64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mem_available_line() {
        let meminfo = "MemTotal:       16384000 kB\nMemAvailable:    8192000 kB\nSwapTotal: 0 kB\n";
        assert_eq!(parse_meminfo_available(meminfo), Some(8_192_000 * 1024));
    }

    #[test]
    fn missing_mem_available_yields_none() {
        assert_eq!(parse_meminfo_available("MemTotal: 1 kB\n"), None);
        assert_eq!(parse_meminfo_available(""), None);
    }

    #[test]
    fn static_advisor_reports_what_it_was_given() {
        assert_eq!(StaticAdvisor(Some(42)).available_memory_bytes(), Some(42));
        assert_eq!(StaticAdvisor(None).available_memory_bytes(), None);
    }
}
