//! Agent instruction templates, compiled into the binary.
pub const REPORT_NAVIGATE_MD: &str = include_str!("../prompts/report_navigate.md");
pub const REPORT_SUBJECT_MD: &str = include_str!("../prompts/report_subject.md");
pub const REPORT_ITEM_MD: &str = include_str!("../prompts/report_item.md");
pub const REPORT_SUBMIT_MD: &str = include_str!("../prompts/report_submit.md");
pub const REPORT_CAPTURE_MD: &str = include_str!("../prompts/report_capture.md");
pub const COMPLAINT_NARRATIVE_MD: &str = include_str!("../prompts/complaint_narrative.md");
pub const COMPLAINT_SUBMIT_MD: &str = include_str!("../prompts/complaint_submit.md");
pub const BUREAU_ACTIVE_CHECK_MD: &str = include_str!("../prompts/bureau_active_check.md");
pub const BUREAU_LOGIN_MD: &str = include_str!("../prompts/bureau_login.md");
pub const BUREAU_SUBMIT_MD: &str = include_str!("../prompts/bureau_submit.md");

/// Replace `{key}` placeholders. Unknown placeholders are left in place.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut text = template.trim_end().to_string();
    for (key, value) in vars {
        text = text.replace(&format!("{{{key}}}"), value);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_every_occurrence() {
        let text = render("{a} and {a} but {b}", &[("a", "x"), ("b", "y")]);
        assert_eq!(text, "x and x but y");
    }

    #[test]
    fn unknown_placeholders_survive() {
        assert_eq!(render("{missing}", &[("a", "x")]), "{missing}");
    }

    #[test]
    fn login_template_names_credentials_placeholders() {
        assert!(BUREAU_LOGIN_MD.contains("{username}"));
        assert!(BUREAU_LOGIN_MD.contains("{password}"));
        assert!(BUREAU_SUBMIT_MD.contains("Confirmation #"));
    }
}
