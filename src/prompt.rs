//! Decision prompt assembly.
//!
//! The system prompt file is a template with two positional `{}` slots: the
//! portfolio JSON first, then the market information block.

/// Market information section handed to the model
pub fn market_info_block(indicators: &str, forecasts: &str) -> String {
    format!(
        "<indicators>\n{}\n</indicators>\n\n<forecast>\n{}\n</forecast>\n",
        indicators.trim_end(),
        forecasts.trim_end()
    )
}

/// Fill the template's `{}` slots in order; extra slots are left as they are
pub fn render_system_prompt(template: &str, portfolio_json: &str, market_info: &str) -> String {
    let mut out = String::with_capacity(template.len() + portfolio_json.len() + market_info.len());
    let mut values = [portfolio_json, market_info].into_iter();
    let mut rest = template;

    while let Some(idx) = rest.find("{}") {
        let Some(value) = values.next() else {
            break;
        };
        out.push_str(&rest[..idx]);
        out.push_str(value);
        rest = &rest[idx + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_filled_in_order() {
        let template = "Portfolio:\n{}\n\nMarket:\n{}\nReply in JSON.";
        let prompt = render_system_prompt(template, r#"{"balance":1000}"#, "<indicators>x</indicators>");
        assert_eq!(
            prompt,
            "Portfolio:\n{\"balance\":1000}\n\nMarket:\n<indicators>x</indicators>\nReply in JSON."
        );
    }

    #[test]
    fn test_values_containing_braces_are_not_reexpanded() {
        let prompt = render_system_prompt("{} | {}", "{}", "m");
        assert_eq!(prompt, "{} | m");
    }

    #[test]
    fn test_template_without_slots_is_unchanged() {
        assert_eq!(render_system_prompt("static", "p", "m"), "static");
        assert_eq!(render_system_prompt("{} {} {}", "a", "b"), "a b {}");
    }

    #[test]
    fn test_market_info_block_sections() {
        let block = market_info_block("<BTC_data>..</BTC_data>\n", "table");
        assert!(block.starts_with("<indicators>\n<BTC_data>..</BTC_data>\n</indicators>"));
        assert!(block.contains("<forecast>\ntable\n</forecast>"));
    }
}
