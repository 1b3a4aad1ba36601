//! Scripted onboarding questions and prompt construction.
//!
//! Everything here is pure string templating so it can be tested without a
//! model or a store.

use crate::llm::ChatMessage;

use super::model::Profile;
use super::state::ConversationStage;

/// System persona for every generated response.
pub const PERSONA: &str = "أنت مورفو، مساعد تسويقي ذكي. جاوب بإجابات قصيرة دقيقة وسياقية.";

/// Welcome shown by the root endpoint.
pub const WELCOME: &str = "مرحباً! أنا مورفو، مساعدك التسويقي الذكي. دعني أتعرف عليك أولاً!";

/// Actions advertised alongside the welcome.
pub const AVAILABLE_ACTIONS: [&str; 3] = ["بدء المحادثة", "تحليل موقع ويب", "استشارة تسويقية"];

const GREETING_QUESTION: &str = "مرحباً! أنا مورفو، مساعدك التسويقي الذكي. ما اسمك؟";
const BUSINESS_TYPE_QUESTION: &str = "ممتاز! ما هي أهدافك التسويقية الرئيسية؟";
const GOALS_QUESTION: &str =
    "شكراً لك! الآن أريد رابط موقع شركتك الإلكتروني لأحلل معلومات الشركة وأساعدك بشكل أفضل.";

const ANALYSIS_SYSTEM_PROMPT: &str = "\
أنت مورفو، مساعد تسويقي ذكي. قم بتحليل الموقع المقدم وقدم تقريراً شاملاً باللغة العربية يتضمن:
1. تقييم عام للموقع
2. نقاط القوة والضعف
3. اقتراحات للتحسين
4. توصيات تسويقية مخصصة
5. استخراج معلومات عن نوع العمل والصناعة من الموقع
اجعل التقرير مفيداً ومهنياً ومخصصاً للمستخدم.";

const UNSPECIFIED: &str = "غير محدد";

/// The question asked while in `stage`, or `None` once onboarding is done.
///
/// The `name` stage greets the user by the name they just gave.
pub fn scripted_question(stage: ConversationStage, name: &str) -> Option<String> {
    match stage {
        ConversationStage::Greeting => Some(GREETING_QUESTION.to_string()),
        ConversationStage::Name => Some(format!(
            "أهلاً وسهلاً {name}! ما هي وظيفتك أو دورك في الشركة؟"
        )),
        ConversationStage::BusinessType => Some(BUSINESS_TYPE_QUESTION.to_string()),
        ConversationStage::Goals => Some(GOALS_QUESTION.to_string()),
        ConversationStage::Complete => None,
    }
}

/// Wrap retrieved knowledge chunks in the framing the model sees.
/// No chunks means no context at all.
pub fn knowledge_context(chunks: &[String]) -> String {
    if chunks.is_empty() {
        return String::new();
    }
    let joined = chunks.join("\n---\n");
    format!(
        "\nهذه بعض المعلومات المتعلقة من أرشيف الشركة:\n\n{joined}\n\n\
         يرجى استخدام هذه المعلومات عند الإجابة على السؤال التالي.\n"
    )
}

/// Assemble the message list for a generated response.
///
/// Order: persona, profile summary (if any), retrieved context (if any), the
/// last `history_window` history entries, then the current message. History
/// entries alternate starting with the user at even offsets of the window.
pub fn build_messages(
    persona: &str,
    profile_summary: &str,
    context: &str,
    history: &[String],
    history_window: usize,
    message: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(persona)];

    if !profile_summary.trim().is_empty() {
        messages.push(ChatMessage::system(format!(
            "{profile_summary}\nاستخدم هذه المعلومات لتقديم نصائح مخصصة."
        )));
    }

    if !context.trim().is_empty() {
        messages.push(ChatMessage::system(context));
    }

    let start = history.len().saturating_sub(history_window);
    for (i, text) in history[start..].iter().enumerate() {
        if i % 2 == 0 {
            messages.push(ChatMessage::user(text.as_str()));
        } else {
            messages.push(ChatMessage::assistant(text.as_str()));
        }
    }

    messages.push(ChatMessage::user(message));
    messages
}

/// Fields of a fetched page that go into the analysis request.
#[derive(Debug, Clone, Copy)]
pub struct PageDigest<'a> {
    pub domain: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub content_preview: &'a str,
}

/// System + user messages asking the model for a website report.
pub fn analysis_messages(page: PageDigest<'_>, profile: Option<&Profile>) -> Vec<ChatMessage> {
    let mut system = ANALYSIS_SYSTEM_PROMPT.to_string();
    if let Some(profile) = profile {
        system.push_str(&format!(
            "\n\nاستخدم معلومات المستخدم التالية لتخصيص التوصيات:\n\
             معلومات المستخدم:\n\
             - الاسم: {}\n\
             - نوع العمل: {}\n\
             - الأهداف: {}",
            or_unspecified(&profile.name),
            or_unspecified(&profile.business_type),
            or_unspecified(&profile.goals),
        ));
    }

    let request = format!(
        "يرجى تحليل هذا الموقع:\n\
         تحليل موقع: {}\n\
         العنوان: {}\n\
         الوصف: {}\n\
         محتوى أولي: {}",
        page.domain, page.title, page.description, page.content_preview
    );

    vec![ChatMessage::system(system), ChatMessage::user(request)]
}

/// Reply when a website couldn't be fetched.
pub fn analysis_unavailable(url: &str, error: &str) -> String {
    format!("عذراً، لم أتمكن من تحليل الموقع {url}. الخطأ: {error}")
}

/// Reply when the model failed while writing a website report.
pub fn analysis_failed(error: &dyn std::fmt::Display) -> String {
    format!("عذراً، حدث خطأ في تحليل الموقع: {error}")
}

fn or_unspecified(value: &str) -> &str {
    if value.trim().is_empty() {
        UNSPECIFIED
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    fn history(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("turn {i}")).collect()
    }

    #[test]
    fn name_question_interpolates_name() {
        let q = scripted_question(ConversationStage::Name, "سارة").unwrap();
        assert_eq!(q, "أهلاً وسهلاً سارة! ما هي وظيفتك أو دورك في الشركة؟");
    }

    #[test]
    fn every_open_stage_has_a_question() {
        for stage in ConversationStage::ALL {
            let q = scripted_question(stage, "x");
            assert_eq!(q.is_none(), stage == ConversationStage::Complete, "{stage}");
        }
        assert_eq!(
            scripted_question(ConversationStage::Greeting, "").as_deref(),
            Some(GREETING_QUESTION)
        );
    }

    #[test]
    fn minimal_prompt_is_persona_and_message() {
        let msgs = build_messages(PERSONA, "", "", &[], 6, "مرحبا");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], ChatMessage::system(PERSONA));
        assert_eq!(msgs[1], ChatMessage::user("مرحبا"));
    }

    #[test]
    fn summary_and_two_turns_give_five_messages() {
        let msgs = build_messages(PERSONA, "ملخص", "", &history(2), 6, "كيف أحسن مبيعاتي؟");
        let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert!(msgs[1].content.starts_with("ملخص\n"));
        assert_eq!(msgs[4].content, "كيف أحسن مبيعاتي؟");
    }

    #[test]
    fn context_goes_after_summary() {
        let msgs = build_messages(PERSONA, "ملخص", "سياق", &[], 6, "سؤال");
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[2], ChatMessage::system("سياق"));
    }

    #[test]
    fn history_is_trimmed_to_window() {
        let msgs = build_messages(PERSONA, "", "", &history(9), 6, "now");
        // persona + 6 history + current
        assert_eq!(msgs.len(), 8);
        assert_eq!(msgs[1], ChatMessage::user("turn 3"));
        assert_eq!(msgs[2], ChatMessage::assistant("turn 4"));
        assert_eq!(msgs[6], ChatMessage::assistant("turn 8"));
    }

    #[test]
    fn knowledge_context_framing() {
        assert!(knowledge_context(&[]).is_empty());
        let ctx = knowledge_context(&["أ".to_string(), "ب".to_string()]);
        assert!(ctx.contains("أرشيف الشركة"));
        assert!(ctx.contains("أ\n---\nب"));
    }

    #[test]
    fn analysis_prompt_with_and_without_profile() {
        let page = PageDigest {
            domain: "example.com",
            title: "Example",
            description: "No description found",
            content_preview: "hello",
        };
        let msgs = analysis_messages(page, None);
        assert_eq!(msgs.len(), 2);
        assert!(!msgs[0].content.contains("معلومات المستخدم"));
        assert!(msgs[1].content.contains("example.com"));

        let mut profile = Profile::new("u1");
        profile.name = "سارة".into();
        let msgs = analysis_messages(page, Some(&profile));
        assert!(msgs[0].content.contains("- الاسم: سارة"));
        assert!(msgs[0].content.contains("- الأهداف: غير محدد"));
    }

    #[test]
    fn failure_replies() {
        let msg = analysis_unavailable("https://x.sa", "timeout");
        assert!(msg.contains("https://x.sa"));
        assert!(msg.ends_with("timeout"));
        assert!(analysis_failed(&"boom").ends_with("boom"));
    }
}
