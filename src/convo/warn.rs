fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub action: &'a str,
    pub subject: &'a str,
    pub path: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

impl WarnEvent<'_> {
    pub fn render(&self) -> String {
        format!(
            "CONVO_WARN code={} stage={} action={} subject={} path={} reason={} err={}",
            sanitize_value(self.code),
            sanitize_value(self.stage),
            sanitize_value(self.action),
            sanitize_value(self.subject),
            sanitize_value(self.path),
            sanitize_value(self.reason),
            sanitize_value(self.err),
        )
    }
}

pub fn emit(event: WarnEvent<'_>) {
    tracing::warn!(code = event.code, stage = event.stage, "{}", event.render());
}

#[cfg(test)]
mod tests {
    use super::{WarnEvent, sanitize_value};

    #[test]
    fn sanitize_value_rewrites_whitespace() {
        assert_eq!(sanitize_value("a b\tc"), "a_b_c");
    }

    #[test]
    fn sanitize_value_falls_back_for_empty() {
        assert_eq!(sanitize_value("   "), "na");
    }

    #[test]
    fn render_keeps_field_order() {
        let line = WarnEvent {
            code: "ORIGIN_MISSING",
            stage: "resolve",
            action: "skip-group",
            subject: "-home-me-app",
            path: "/logs/-home-me-app",
            reason: "no cwd in first lines",
            err: "",
        }
        .render();
        assert_eq!(
            line,
            "CONVO_WARN code=ORIGIN_MISSING stage=resolve action=skip-group subject=-home-me-app \
             path=/logs/-home-me-app reason=no_cwd_in_first_lines err=na"
        );
    }
}
