//! 离线模拟回复（无 API Key 或 offline_mode 时使用，不访问网络）
//!
//! 按意图关键字表挑选固定回复，同一输入总是得到同一输出。

/// 意图关键字表：按顺序匹配，先命中者生效
const INTENTS: &[(&[&str], &str)] = &[
    (
        &["order", "purchase", "buy"],
        "I'd be happy to help you with your order. Could you please provide your order number so I can look it up for you?",
    ),
    (
        &["return", "refund", "exchange"],
        "I can assist you with returns and refunds. Please let me know your order number and the reason for the return, and I'll help you process it.",
    ),
    (
        &["shipping", "delivery", "track"],
        "I can help you track your shipment. Please provide your tracking number or order number, and I'll check the status for you.",
    ),
    (
        &["help", "support", "assist"],
        "I'm here to help! What can I assist you with today? I can help with orders, returns, shipping, product information, and more.",
    ),
];

/// 问候语只按整词匹配，避免 "this"、"shipping" 之类误判
const GREETINGS: &[&str] = &["hello", "hi", "hey"];

fn is_greeting(lower: &str) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| GREETINGS.contains(&word))
}

/// 生成模拟回复；有 speaker_name 时以 "Hello <name>! " 开头
pub fn mock_reply(user_message: &str, speaker_name: Option<&str>) -> String {
    let greeting = match speaker_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Hello {}! ", name),
        None => "Hello! ".to_string(),
    };

    let lower = user_message.to_lowercase();
    let body = INTENTS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, reply)| reply.to_string())
        .unwrap_or_else(|| {
            if is_greeting(&lower) {
                "Thank you for contacting us! How can I assist you today?".to_string()
            } else {
                format!(
                    "Thank you for your message. I understand you're asking about: '{}'. Let me help you with that. Could you provide a bit more detail so I can assist you better?",
                    user_message.trim()
                )
            }
        });

    format!("{greeting}{body}")
}
