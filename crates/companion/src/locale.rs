//! Fixed output-language text. Every model-facing instruction and every
//! user-facing message lives here; the output language is not a runtime setting.

/// Instruction sent alongside the image in the extraction request.
pub const IDENTIFY_INSTRUCTION: &str = "זהה את הצמח בתמונה וספק הוראות טיפול מפורטות. \
     החזר את המידע בפורמט JSON תקין התואם לסכמה. כל הטקסט חייב להיות בעברית.";

/// System persona for the extraction request.
pub const BOTANIST_PERSONA: &str = "אתה בוטנאי מומחה הדובר עברית. נתח את הצמח בתמונה בצורה מדויקת. \
     ספק פרטי טיפול מועילים, מעודדים ומדויקים בשפה העברית.";

/// System persona for the chat session. Fixed for the session's lifetime.
pub const ASSISTANT_PERSONA: &str = "אתה עוזר גינון ידידותי וידען בשם 'צמח-לי'. \
     אתה עוזר למשתמשים לזהות צמחים, לפתור בעיות ולתת עצות גינון. \
     ענה תמיד בעברית. שמור על תשובות תמציתיות אך מועילות.";

pub const CHAT_WELCOME: &str =
    "שלום! אני צמח-לי 🌿. אפשר לשאול אותי כל דבר על הצמחים והגינה שלך!";

pub const IDENTIFY_FAILED: &str = "לא הצלחנו לזהות את הצמח. נסה תמונה ברורה יותר.";

pub const CHAT_FAILED: &str =
    "סליחה, אני מתקשה להתחבר לרשת כרגע. אנא נסו שוב מאוחר יותר.";

pub const FILE_READ_FAILED: &str = "שגיאה בעיבוד התמונה. נסה לבחור קובץ תמונה אחר.";

pub const URL_FETCH_FAILED: &str = "לא ניתן לטעון את התמונה מקישור זה. בדקו את הקישור ונסו שוב.";

pub const URL_CROSS_ORIGIN: &str = "לא ניתן לטעון את התמונה מקישור זה \
     (לרוב עקב הגבלות אבטחה של האתר). מומלץ להוריד את התמונה ולהעלות אותה כקובץ.";
