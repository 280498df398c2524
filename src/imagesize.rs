//! 从图片字节头部探测像素尺寸
//!
//! 占位图按真实像素尺寸换算 EMU 定位,这里只读文件头,不解码像素数据。

/// 能识别的图片格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
    Tiff,
}

fn detect_format(data: &[u8]) -> Option<ImageFormat> {
    if data.len() < 12 {
        return None;
    }
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageFormat::Png)
    } else if data.starts_with(&[0xFF, 0xD8]) {
        Some(ImageFormat::Jpeg)
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some(ImageFormat::Gif)
    } else if data.starts_with(b"BM") {
        Some(ImageFormat::Bmp)
    } else if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        Some(ImageFormat::Webp)
    } else if data.starts_with(b"II") || data.starts_with(b"MM") {
        Some(ImageFormat::Tiff)
    } else {
        None
    }
}

/// 探测图片字节的像素尺寸,返回 `(宽, 高)`。
///
/// 只看文件头,支持 PNG、JPEG、GIF(87a/89a)、BMP、
/// WebP(VP8/VP8L/VP8X)和 TIFF(II/MM 两种字节序)。
/// 格式不认识或文件头被截断时返回 `None`。
pub fn get_image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    match detect_format(data)? {
        ImageFormat::Png => png_dimensions(data),
        ImageFormat::Jpeg => jpeg_dimensions(data),
        ImageFormat::Gif => gif_dimensions(data),
        ImageFormat::Bmp => bmp_dimensions(data),
        ImageFormat::Webp => webp_dimensions(data),
        ImageFormat::Tiff => tiff_dimensions(data),
    }
}

fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // IHDR 紧跟 8 字节签名:宽在 16~19,高在 20~23,大端
    if data.len() < 24 {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    Some((width, height))
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // 扫描段标记,SOF0/SOF2 段里带宽高
    let mut i = 2;
    while i + 9 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = data[i + 1];
        let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if marker == 0xC0 || marker == 0xC2 {
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some((width, height));
        }
        i += 2 + len;
    }
    None
}

fn gif_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let width = u16::from_le_bytes([data[6], data[7]]) as u32;
    let height = u16::from_le_bytes([data[8], data[9]]) as u32;
    Some((width, height))
}

fn bmp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 26 {
        return None;
    }
    let width = u32::from_le_bytes(data[18..22].try_into().ok()?);
    let height = u32::from_le_bytes(data[22..26].try_into().ok()?);
    Some((width, height))
}

fn webp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 30 {
        return None;
    }
    match &data[12..16] {
        b"VP8X" => {
            let width = 1 + u32::from_le_bytes([data[24], data[25], data[26], 0]);
            let height = 1 + u32::from_le_bytes([data[27], data[28], data[29], 0]);
            Some((width, height))
        }
        b"VP8 " => {
            let width = u16::from_le_bytes([data[26], data[27]]) as u32;
            let height = u16::from_le_bytes([data[28], data[29]]) as u32;
            Some((width, height))
        }
        b"VP8L" => {
            let b = &data[21..25];
            let width = 1 + (((b[1] & 0x3F) as u32) << 8 | b[0] as u32);
            let height =
                1 + (((b[3] & 0xF) as u32) << 10 | (b[2] as u32) << 2 | ((b[1] & 0xC0) as u32) >> 6);
            Some((width, height))
        }
        _ => None,
    }
}

fn tiff_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let le = data.starts_with(b"II");
    let read_u16 = |d: &[u8]| {
        if le {
            u16::from_le_bytes([d[0], d[1]])
        } else {
            u16::from_be_bytes([d[0], d[1]])
        }
    };
    let read_u32 = |d: &[u8]| {
        if le {
            u32::from_le_bytes([d[0], d[1], d[2], d[3]])
        } else {
            u32::from_be_bytes([d[0], d[1], d[2], d[3]])
        }
    };
    if read_u16(&data[2..4]) != 42 {
        return None;
    }
    let ifd_offset = read_u32(&data[4..8]) as usize;
    if data.len() < ifd_offset + 2 {
        return None;
    }
    let num_dir = read_u16(&data[ifd_offset..ifd_offset + 2]) as usize;
    let mut width = None;
    let mut height = None;
    for i in 0..num_dir {
        let entry = ifd_offset + 2 + i * 12;
        if data.len() < entry + 12 {
            break;
        }
        let tag = read_u16(&data[entry..entry + 2]);
        let field_type = read_u16(&data[entry + 2..entry + 4]);
        let value = &data[entry + 8..entry + 12];
        // tag 256: ImageWidth, tag 257: ImageLength
        let parsed = match field_type {
            3 => Some(read_u16(value) as u32),
            4 => Some(read_u32(value)),
            _ => None,
        };
        match tag {
            256 => width = parsed.or(width),
            257 => height = parsed.or(height),
            _ => {}
        }
        if width.is_some() && height.is_some() {
            break;
        }
    }
    Some((width?, height?))
}
