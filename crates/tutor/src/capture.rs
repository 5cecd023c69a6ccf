use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local};
use image::imageops::FilterType;
use image::RgbaImage;

use crate::error::{Error, Result};

/// One captured screen image, PNG-encoded then base64-encoded so it can be
/// embedded in a model request as-is. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    png_base64: String,
    captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap an already-encoded payload, stamped with the current time.
    pub fn new(png_base64: String) -> Self {
        Self::with_timestamp(png_base64, Local::now())
    }

    pub fn with_timestamp(png_base64: String, captured_at: DateTime<Local>) -> Self {
        Self {
            png_base64,
            captured_at,
        }
    }

    pub fn png_base64(&self) -> &str {
        &self.png_base64
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }
}

/// Anything that can produce a frame of the visible display.
///
/// Called from the sampler thread only. Errors are treated as transient.
pub trait ScreenshotSource: Send + Sync {
    fn capture(&self) -> Result<Frame>;
}

/// Downscale to `max_width` (keeping aspect), encode PNG, then base64.
pub fn encode_frame(mut img: RgbaImage, max_width: u32) -> Result<Frame> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::Capture(format!("zero dimensions ({width}x{height})")));
    }

    if max_width > 0 && width > max_width {
        let new_height = ((height as f64 * max_width as f64 / width as f64) as u32).max(1);
        img = image::imageops::resize(&img, max_width, new_height, FilterType::Triangle);
    }

    let mut png_buf = Cursor::new(Vec::new());
    img.write_to(&mut png_buf, image::ImageFormat::Png)
        .map_err(|e| Error::Capture(format!("PNG encoding failed: {e}")))?;

    Ok(Frame::new(STANDARD.encode(png_buf.into_inner())))
}

/// Captures the whole desktop through the platform API.
pub struct DesktopCapture {
    max_width: u32,
}

impl DesktopCapture {
    pub fn new(max_width: u32) -> Self {
        Self { max_width }
    }
}

impl ScreenshotSource for DesktopCapture {
    fn capture(&self) -> Result<Frame> {
        let img = platform::grab_screen()?;
        encode_frame(img, self.max_width)
    }
}

#[cfg(windows)]
mod platform {
    use image::RgbaImage;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
        GetDIBits, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
        DIB_RGB_COLORS, SRCCOPY,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    use crate::error::{Error, Result};

    pub(super) fn grab_screen() -> Result<RgbaImage> {
        unsafe { capture_gdi() }
    }

    /// BitBlt the virtual screen (every monitor) from the screen DC, which
    /// includes DWM-composited content.
    unsafe fn capture_gdi() -> Result<RgbaImage> {
        let left = GetSystemMetrics(SM_XVIRTUALSCREEN);
        let top = GetSystemMetrics(SM_YVIRTUALSCREEN);
        let width = GetSystemMetrics(SM_CXVIRTUALSCREEN);
        let height = GetSystemMetrics(SM_CYVIRTUALSCREEN);
        if width <= 0 || height <= 0 {
            return Err(Error::Capture(format!("zero dimensions ({width}x{height})")));
        }
        let (width, height) = (width as u32, height as u32);

        let hdc_screen = GetDC(HWND(0));
        if hdc_screen.is_invalid() {
            return Err(Error::Capture("GetDC(screen) returned invalid handle".into()));
        }

        let hdc_mem = CreateCompatibleDC(hdc_screen);
        if hdc_mem.is_invalid() {
            ReleaseDC(HWND(0), hdc_screen);
            return Err(Error::Capture("CreateCompatibleDC failed".into()));
        }

        let hbitmap = CreateCompatibleBitmap(hdc_screen, width as i32, height as i32);
        if hbitmap.is_invalid() {
            DeleteDC(hdc_mem);
            ReleaseDC(HWND(0), hdc_screen);
            return Err(Error::Capture("CreateCompatibleBitmap failed".into()));
        }

        let old_object = SelectObject(hdc_mem, hbitmap);

        let blt = BitBlt(
            hdc_mem,
            0,
            0,
            width as i32,
            height as i32,
            hdc_screen,
            left,
            top,
            SRCCOPY,
        );
        if blt.is_err() {
            SelectObject(hdc_mem, old_object);
            DeleteDC(hdc_mem);
            ReleaseDC(HWND(0), hdc_screen);
            DeleteObject(hbitmap);
            return Err(Error::Capture("BitBlt failed".into()));
        }

        // Negative biHeight = top-down rows.
        let mut bmi = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width as i32,
                biHeight: -(height as i32),
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..std::mem::zeroed()
            },
            ..std::mem::zeroed()
        };

        let mut pixels = vec![0u8; (width * height * 4) as usize];
        let lines = GetDIBits(
            hdc_mem,
            hbitmap,
            0,
            height,
            Some(pixels.as_mut_ptr() as *mut _),
            &mut bmi,
            DIB_RGB_COLORS,
        );

        SelectObject(hdc_mem, old_object);
        DeleteDC(hdc_mem);
        ReleaseDC(HWND(0), hdc_screen);
        DeleteObject(hbitmap);

        if lines == 0 {
            return Err(Error::Capture("GetDIBits returned 0 lines".into()));
        }

        // BGRA -> RGBA
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
        }

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| Error::Capture("could not build image from raw pixels".into()))
    }
}

#[cfg(not(windows))]
mod platform {
    use image::RgbaImage;

    use crate::error::{Error, Result};

    pub(super) fn grab_screen() -> Result<RgbaImage> {
        Err(Error::Capture(
            "desktop capture is not available on this platform".into(),
        ))
    }
}
