/// The fixed-string collaborator: `contextTruncationNotice()`,
/// `duplicateFileReadNotice()`, `processFirstUserMessageForTruncation()`.
///
/// Modeled as a trait, not bare constants, so a host can override wording
/// without forking the crate: a concrete default a caller can entirely
/// replace.
pub trait NoticeProvider {
    fn context_truncation_notice(&self) -> String;
    fn duplicate_file_read_notice(&self) -> String;
    fn process_first_user_message_for_truncation(&self, original: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNoticeProvider;

impl NoticeProvider for DefaultNoticeProvider {
    fn context_truncation_notice(&self) -> String {
        crate::truncate::context_truncation_notice().to_string()
    }

    fn duplicate_file_read_notice(&self) -> String {
        crate::optimizer::duplicate_file_read_notice().to_string()
    }

    fn process_first_user_message_for_truncation(&self, original: &str) -> String {
        format!(
            "[This is the original task. Earlier context has since been truncated.]\n\n{original}"
        )
    }
}
