//! 动作解析集成测试：清洗幂等与常见模型输出形态

#[cfg(test)]
mod tests {
    use forager::react::{sanitize, ActionParser};

    const FRAGMENTS: &[&str] = &[
        "",
        " ",
        "\n",
        "\t",
        "\r\n",
        "✅",
        "🚀",
        "\u{FE0F}",
        "\u{200B}",
        "\u{FEFF}",
        "\u{0007}",
        "\u{001B}[0m",
        "Action:",
        "```json",
        "{\"tool\": \"ls\"}",
        "→",
        "plain",
    ];

    #[test]
    fn test_sanitize_idempotent_over_fragment_combinations() {
        for a in FRAGMENTS {
            for b in FRAGMENTS {
                for c in FRAGMENTS {
                    let t = format!("{a}{b}{c}");
                    let once = sanitize(&t);
                    assert_eq!(sanitize(&once), once, "input {t:?}");
                }
            }
        }
    }

    #[test]
    fn test_sanitize_keeps_normal_whitespace() {
        assert_eq!(sanitize("a\tb\r\n  c\n"), "a\tb\r\n  c\n");
    }

    #[test]
    fn test_decorated_react_reply() {
        let parser = ActionParser::new(["ls", "git_status", "execute_code"]);
        let raw = "🤔 Thought: I should check the repository state.\n\
                   ✅ Action: ```json\n{\"tool\": \"Git Status\", \"input\": {\"path\": \".\"}}\n```";
        let step = parser.parse(raw).unwrap();
        assert_eq!(step.action.tool, "git_status");
        assert_eq!(step.action.input.get("path"), Some("."));
        assert_eq!(step.thought, "I should check the repository state.");
    }

    #[test]
    fn test_code_with_memory_reference_across_lines() {
        let parser = ActionParser::new(["execute_code"]);
        let raw = "```json\n{\n  \"thought\": \"count entries\",\n  \"action\": {\n    \"tool\": \"execute_code\",\n    \"input\": {\n      \"language\": \"python\",\n      \"code\": \"entries = memory[\\\"directory_listing\\\"]\nprint(len(entries))\"\n    }\n  }\n}\n```";
        let step = parser.parse(raw).unwrap();
        assert_eq!(
            step.action.input.get("code"),
            Some("entries = memory['directory_listing']\nprint(len(entries))")
        );
        assert_eq!(step.action.input.get("language"), Some("python"));
    }
}
