use colored::Colorize;
use qrcode::QrCode;
use qrcode::render::{svg, unicode};

use super::errors::Result;

/// 渲染成 SVG，给网页前端展示
pub fn render_svg(url: &str) -> Result<String> {
    let code = QrCode::new(url)?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .build())
}

/// 渲染成终端可显示的字符画
pub fn render_unicode(url: &str) -> Result<String> {
    let code = QrCode::new(url)?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .quiet_zone(false) // 要不要边缘空白
        .module_dimensions(1, 1)
        .build())
}

pub fn display_qr(url: &str) -> Result<()> {
    let image = render_unicode(url)?;
    println!("{}: ", "请扫描二维码".green());
    print!("\n{}\n", image);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_URL: &str =
        "https://account.bilibili.com/h5/account-h5/auth/scan-web?qrcode_key=8f2a&navhide=1";

    #[test]
    fn test_render_svg() {
        let svg = render_svg(LOGIN_URL).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn test_render_unicode() {
        let image = render_unicode(LOGIN_URL).unwrap();
        assert!(image.lines().count() > 10);
    }
}
