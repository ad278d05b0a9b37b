// Supported novel sites
//
// - quanben: quanben.io, bulk download
// - piaotian: piaotia.com, sequential download
// - ttkan: cn.ttkan.co / www.ttkan.co, bulk download
// - dxmwx: www.dxmwx.org, bulk download
// - eightxsk: 8xsk.cc / 8xbook.cc, sequential, paged chapter index
// - langrenxiaoshuo: langrenxiaoshuo.com, sequential download
// - leyuedu: www.22is.com, bulk download

pub mod dxmwx;
pub mod eightxsk;
pub mod langrenxiaoshuo;
pub mod leyuedu;
pub mod piaotian;
pub mod quanben;
pub mod ttkan;

pub use dxmwx::DxmwxSource;
pub use eightxsk::EightXskSource;
pub use langrenxiaoshuo::LangrenSource;
pub use leyuedu::LeyueduSource;
pub use piaotian::PiaotianSource;
pub use quanben::QuanbenSource;
pub use ttkan::TtkanSource;

use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};

/// Selectors are string literals; a parse failure is a programming error.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {:?}: {}", css, e))
}

/// Element text with surrounding whitespace removed.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// True when some ancestor of `element` matches `pred`.
pub(crate) fn has_ancestor<P>(element: ElementRef<'_>, pred: P) -> bool
where
    P: Fn(&Element) -> bool,
{
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| pred(ancestor.value()))
}

/// Trimmed, non-empty text nodes under `element`, leaving out text inside
/// elements matching `hidden`.
pub(crate) fn text_lines<P>(element: ElementRef<'_>, hidden: P) -> Vec<String>
where
    P: Fn(&Element) -> bool,
{
    element
        .descendants()
        .filter(|node| {
            !node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|ancestor| hidden(ancestor.value()))
        })
        .filter_map(|node| node.value().as_text().map(|text| text.trim().to_string()))
        .filter(|text| !text.is_empty())
        .collect()
}

/// `content` of the first matching `<meta>` tag that has a non-empty one.
pub(crate) fn meta_content(document: &Html, css: &str) -> Option<String> {
    document
        .select(&selector(css))
        .filter_map(|tag| tag.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

pub(crate) fn is_script(element: &Element) -> bool {
    matches!(element.name(), "script" | "style")
}
