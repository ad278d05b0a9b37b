//! Instruction texts sent to the model and the prompt builder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BookError;

pub const CHINA_FANTASY_PROMPT: &str = r#"
Hãy đóng vai một dịch giả chuyên nghiệp, chuyên về thể loại Tiên Hiệp và Huyền Huyễn. Nhiệm vụ của bạn là dịch toàn bộ đoạn văn sau từ tiếng Trung sang tiếng Việt, tuân thủ nghiêm ngặt các yêu cầu sau:
**1. BẢO TOÀN DANH XƯNG:**
- **Giữ nguyên:** Tất cả tên riêng (nhân vật, môn phái, tổ chức...), địa danh, tên pháp bảo, tên công pháp, tên các loại đan dược, linh thú, yêu thú...
- **Định dạng:** Đối với tên riêng, phải trả về bản Tiếng Việt, **không** trả về dạng pinyin.

**2. PHONG CÁCH NGÔN NGỮ:**
- **Văn phong và từ ngữ:** Ưu tiên sử dụng từ thuần Việt, dễ hiểu cho bản dịch. Hạn chế sử dụng từ Hán Việt ngoài ngữ cảnh Tiên Hiệp/Huyền Huyễn.
- Những từ không thuộc ngữ cảnh truyện Tiên Hiệp/Huyền Ảo thì dùng từ thuần Việt, ví dụ: "nương"-> "mẹ", "chuế tuế"-> "ở rể", "sáo lộ"-> "kịch bản",...
- Những từ Hán Việt thuộc ngữ cảnh truyện Tiên Hiệp/Huyền Ảo thì giữ nguyên, ví dụ: "linh khí", "nguyên thần", "đạo tâm", "tâm ma", "cảnh giới", "phi thăng",...
- **Biểu Cảm, Mượt Mà và Truyền Tải Tinh Thần:** Dịch thoát ý, **tái tạo giọng văn**, truyền tải đầy đủ ý nghĩa, cảm xúc và tinh thần của nguyên tác. Câu văn Tiếng Việt mượt mà, tự nhiên, dễ đọc.
- **Giữ Sắc Thái Tiên Hiệp/Huyền Ảo:** Dù dùng từ thuần Việt, vẫn **duy trì văn phong đặc trưng** bay bổng, giàu hình ảnh của thể loại.

**3. XƯNG HÔ NHẤT QUÁN:**
- **Cổ Trang:** Sử dụng hệ thống đại từ nhân xưng, từ xưng hô cổ trang một cách nhất quán.
- **Phù Hợp:** Xác định rõ mối quan hệ giữa các nhân vật (sư đồ, người yêu, mẹ con, chủ tớ, huynh đệ, bằng hữu, đối thủ,...) và địa vị xã hội để chọn từ xưng hô cho phù hợp (ví dụ: ta - ngươi, ta - ngài, chàng - thiếp, mẹ - con,...).
- **Ngữ Cảnh:** Linh hoạt thay đổi cách xưng hô tùy theo diễn biến tình cảm và tình huống giao tiếp.

**4. ĐỘ CHÍNH XÁC TUYỆT ĐỐI:**
- **Không Sót Chữ:** Bản dịch phải hoàn toàn bằng tiếng Việt. Bất kỳ từ, cụm từ, hay ký tự tiếng Trung nào còn sót lại đều khiến bản dịch bị coi là KHÔNG HỢP LỆ.
- **Không Sai Nghĩa:** Đảm bảo bản dịch truyền tải chính xác nội dung và ý nghĩa của nguyên tác.

**5. ĐỊNH DẠNG KẾT QUẢ:**
- **Chỉ Nội Dung:** Chỉ cung cấp phần văn bản đã dịch hoàn chỉnh. Không thêm bất kỳ lời giải thích, chú thích, bình luận, hay thông tin nào khác, không trả về các ký tự lạ.
"#;

pub const MODERN_PROMPT: &str = r#"
Hãy đóng vai một dịch giả chuyên nghiệp, chuyên về thể loại truyện Hiện Đại. Nhiệm vụ của bạn là dịch toàn bộ đoạn văn sau từ tiếng Trung sang tiếng Việt, tuân thủ nghiêm ngặt các yêu cầu sau:

**1. QUY TẮC BẢO TOÀN DANH XƯNG**
- **Tên riêng:** Bao gồm tên nhân vật, công ty, tổ chức, địa danh, thương hiệu, sản phẩm, đường phố, trường học, địa điểm cụ thể...
- Nếu tên riêng trong văn bản gốc là **tiếng Hán**, bắt buộc phải dịch sang Tiếng Việt.
- Nếu tên riêng có nguồn gốc là **tiếng Anh** nhưng được viết bằng tiếng Hán trong bản gốc (ví dụ: "星巴克"), thì kết quả **phải trả về tiếng Anh** ("Starbucks").
- **KHÔNG** trả về dưới dạng chữ Hán hoặc Pinyin trong kết quả dịch.

**2. PHONG CÁCH NGÔN NGỮ:**
- **Hiện đại & Thuần Việt:** Ưu tiên tối đa từ thuần Việt, dễ hiểu, tự nhiên trong văn phong hiện đại. Hạn chế Hán Việt trừ khi thông dụng trong giao tiếp hiện đại.
- **Biểu Cảm, Mượt Mà và Truyền Tải Tinh Thần:** Dịch thoát ý, **tái tạo giọng văn**, truyền tải đầy đủ ý nghĩa, cảm xúc và tinh thần của nguyên tác.
- **Giữ Sắc Thái Hiện Đại:** Dùng từ ngữ, thành ngữ, cách diễn đạt **phù hợp với bối cảnh hiện đại**.

**3. XƯNG HÔ CHÍNH XÁC & NHẤT QUÁN:**
- Sử dụng hệ thống đại từ nhân xưng hiện đại một cách nhất quán và **chính xác tuyệt đối về mối quan hệ** (gia đình, bạn bè, đồng nghiệp, cấp trên-cấp dưới,...).
- **ĐẶC BIỆT CHÚ Ý:** Dịch chính xác các mối quan hệ gia đình, ví dụ: **Anh rể** là chồng của chị gái, **Em dâu** là vợ của em trai.

**4. ĐỘ CHÍNH XÁC TUYỆT ĐỐI:**
- **Đơn vị số học:** Dịch chính xác (ngàn, vạn, triệu, tỷ), **không chuyển đổi giá trị** (200 vạn không chuyển thành 2 triệu).
- **Không Sót Chữ:** Bản dịch phải hoàn toàn bằng tiếng Việt. Bất kỳ ký tự tiếng Trung nào còn sót lại đều khiến bản dịch bị coi là KHÔNG HỢP LỆ.

**5. ĐỊNH DẠNG KẾT QUẢ:**
- **Chỉ Nội Dung:** Chỉ cung cấp phần văn bản đã dịch hoàn chỉnh. Không thêm bất kỳ lời giải thích, chú thích, bình luận, hay thông tin nào khác.
"#;

pub const BOOK_INFO_PROMPT: &str = r#"
Dịch tiêu đề / tên tác giả sau đoạn từ Tiếng Trung sang Tiếng Việt
Ưu tiên sử dụng từ Hán Việt
Chỉ cung cấp phần văn bản đã dịch hoàn chỉnh. Không thêm bất kỳ lời giải thích, chú thích, bình luận, hay thông tin nào khác.
"#;

pub const INCOMPLETE_HANDLE_PROMPT: &str = r#"
Đoạn văn sau là bản dịch tiếng Việt nhưng vẫn còn sót lại một số từ hoặc câu tiếng Trung.
Hãy dịch toàn bộ phần tiếng Trung còn sót sang tiếng Việt, giữ nguyên phần đã dịch, giữ nguyên cách xưng hô và tên riêng đã dùng.
Chỉ cung cấp phần văn bản hoàn chỉnh bằng tiếng Việt. Không thêm bất kỳ lời giải thích, chú thích, bình luận, hay thông tin nào khác.
"#;

pub const NAME_PROMPT: &str = "Danh sách các tên riêng và số lần xuất hiện ở các bản dịch trước, dựa vào nó khi dịch các tên riêng:";

const CONTENT_MARKER: &str = "[**NỘI DUNG ĐOẠN VĂN**]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptStyle {
    Modern,
    ChinaFantasy,
    BookInfo,
    IncompleteHandle,
}

impl PromptStyle {
    pub fn base_prompt(&self) -> &'static str {
        match self {
            Self::Modern => MODERN_PROMPT,
            Self::ChinaFantasy => CHINA_FANTASY_PROMPT,
            Self::BookInfo => BOOK_INFO_PROMPT,
            Self::IncompleteHandle => INCOMPLETE_HANDLE_PROMPT,
        }
    }
}

impl FromStr for PromptStyle {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "modern" => Ok(Self::Modern),
            "2" | "fantasy" | "china-fantasy" | "chinafantasy" => Ok(Self::ChinaFantasy),
            "3" | "book-info" | "bookinfo" => Ok(Self::BookInfo),
            "4" | "incomplete" | "incomplete-handle" => Ok(Self::IncompleteHandle),
            _ => Err(BookError::Config(format!(
                "Invalid prompt style '{}'. Valid styles: modern, fantasy, book-info, incomplete",
                s
            ))),
        }
    }
}

impl fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Modern => "modern",
            Self::ChinaFantasy => "china-fantasy",
            Self::BookInfo => "book-info",
            Self::IncompleteHandle => "incomplete-handle",
        };
        f.write_str(name)
    }
}

/// Wrap `text` between two copies of the style's instructions.
pub fn build_translation_prompt(text: &str, additional_info: Option<&str>, style: PromptStyle) -> String {
    let base_prompt = style.base_prompt();
    let wrapped = format!("{}\n{}\n{}", CONTENT_MARKER, text.trim(), CONTENT_MARKER);

    match additional_info {
        Some(info) if !info.trim().is_empty() => {
            format!("{}\n{}\n{}\n\n{}", base_prompt, wrapped, base_prompt, info)
                .trim()
                .to_string()
        }
        _ => format!("{}\n{}\n{}", base_prompt, wrapped, base_prompt)
            .trim()
            .to_string(),
    }
}
