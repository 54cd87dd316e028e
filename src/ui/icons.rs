//! Shared terminal icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "->");
pub static FILE_MOD: Emoji<'_, '_> = Emoji("📝 ", "~");
pub static KEY: Emoji<'_, '_> = Emoji("🔑 ", "");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
