//! Raw CDP keyboard and mouse dispatch with human cadence.
//!
//! Everything here goes through `Input.dispatchKeyEvent` and
//! `Input.dispatchMouseEvent` rather than setting `.value` from script:
//! key events fire the real `keydown`/`input` chain, which is what
//! framework-bound form fields and bot checks both listen for. Delays and
//! fumbles come from the caller's [`PacingPolicy`] so tests can run the
//! same paths with zero waits.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use rand::RngExt;

use super::PacingPolicy;

/// Click an element the way a hand would: approach the target in steps,
/// settle briefly, press and release.
pub async fn human_click(
    page: &Page,
    css: &str,
    pacing: &dyn PacingPolicy,
) -> Result<(), CdpError> {
    let element = page.find_element(css).await?;
    let point = element.clickable_point().await?;

    // Humans neither start at the target nor hit its exact centre.
    let (start_x, start_y, target_x, target_y) = {
        let mut rng = rand::rng();
        (
            rng.random_range(50.0..400.0),
            rng.random_range(50.0..300.0),
            point.x + rng.random_range(-2.0..2.0),
            point.y + rng.random_range(-2.0..2.0),
        )
    };

    let steps = pacing.pointer_steps().max(1);
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        page.execute(
            DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(start_x + (target_x - start_x) * t)
                .y(start_y + (target_y - start_y) * t)
                .build()
                .unwrap(),
        )
        .await?;

        let step_delay = pacing.pointer_step_delay_ms();
        if step_delay > 0 {
            tokio::time::sleep(Duration::from_millis(step_delay)).await;
        }
    }

    page.execute(
        DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(target_x)
            .y(target_y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap(),
    )
    .await?;

    let hold = pacing.settle_ms(40, 120);
    if hold > 0 {
        tokio::time::sleep(Duration::from_millis(hold)).await;
    }

    page.execute(
        DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(target_x)
            .y(target_y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap(),
    )
    .await?;

    Ok(())
}

/// Type into whatever currently holds focus, one key pair per character.
pub async fn type_text(
    page: &Page,
    text: &str,
    pacing: &dyn PacingPolicy,
) -> Result<(), CdpError> {
    for (i, c) in text.chars().enumerate() {
        if i > 0 && pacing.should_backtrack() {
            fumble_and_correct(page, c, pacing).await?;
        }

        dispatch_char(page, c).await?;

        let mut pause = pacing.key_delay_ms();
        if let Some(think) = pacing.thinking_pause_ms() {
            pause += think;
        }
        if pause > 0 {
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
    }
    Ok(())
}

/// Click into a field, wipe it, and type `text` with the given cadence.
pub async fn fill_field(
    page: &Page,
    css: &str,
    text: &str,
    pacing: &dyn PacingPolicy,
) -> Result<(), CdpError> {
    human_click(page, css, pacing).await?;

    let settle = pacing.settle_ms(150, 400);
    if settle > 0 {
        tokio::time::sleep(Duration::from_millis(settle)).await;
    }

    clear_field(page).await?;
    type_text(page, text, pacing).await
}

/// Ctrl+A then Backspace. Clears a field through the event chain instead of
/// assigning `.value`, which framework-bound inputs ignore.
pub async fn clear_field(page: &Page) -> Result<(), CdpError> {
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key("a")
            .modifiers(2) // ctrl
            .build()
            .unwrap(),
    )
    .await?;
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key("a")
            .build()
            .unwrap(),
    )
    .await?;

    press_backspace(page).await
}

/// Enter as the full rawKeyDown / char `\r` / keyUp triple. The bare key
/// event alone does not submit forms in Chrome.
pub async fn press_enter(page: &Page) -> Result<(), CdpError> {
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::RawKeyDown)
            .key("Enter")
            .code("Enter")
            .windows_virtual_key_code(13)
            .native_virtual_key_code(13)
            .build()
            .unwrap(),
    )
    .await?;
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::Char)
            .text("\r")
            .build()
            .unwrap(),
    )
    .await?;
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key("Enter")
            .code("Enter")
            .windows_virtual_key_code(13)
            .native_virtual_key_code(13)
            .build()
            .unwrap(),
    )
    .await?;
    Ok(())
}

async fn dispatch_char(page: &Page, c: char) -> Result<(), CdpError> {
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .text(c.to_string())
            .build()
            .unwrap(),
    )
    .await?;
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .build()
            .unwrap(),
    )
    .await?;
    Ok(())
}

// Hit a key next to the intended one, notice, backspace. Non-letters are
// never fumbled.
async fn fumble_and_correct(
    page: &Page,
    intended: char,
    pacing: &dyn PacingPolicy,
) -> Result<(), CdpError> {
    let wrong = {
        let mut rng = rand::rng();
        neighbour_key(intended, rng.random_range(0..2) == 0)
    };
    let Some(wrong) = wrong else {
        return Ok(());
    };

    dispatch_char(page, wrong).await?;
    let notice = pacing.settle_ms(200, 500);
    if notice > 0 {
        tokio::time::sleep(Duration::from_millis(notice)).await;
    }

    press_backspace(page).await?;
    let recover = pacing.settle_ms(100, 250);
    if recover > 0 {
        tokio::time::sleep(Duration::from_millis(recover)).await;
    }
    Ok(())
}

async fn press_backspace(page: &Page) -> Result<(), CdpError> {
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::RawKeyDown)
            .key("Backspace")
            .code("Backspace")
            .windows_virtual_key_code(8)
            .build()
            .unwrap(),
    )
    .await?;
    page.execute(
        DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key("Backspace")
            .code("Backspace")
            .build()
            .unwrap(),
    )
    .await?;
    Ok(())
}

fn neighbour_key(intended: char, below: bool) -> Option<char> {
    if !intended.is_ascii_alphabetic() {
        return None;
    }
    let offset: i32 = if below { -1 } else { 1 };
    let candidate = ((intended as i32) + offset) as u8 as char;
    candidate.is_ascii_alphabetic().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbour_keys_stay_alphabetic() {
        assert_eq!(neighbour_key('b', false), Some('c'));
        assert_eq!(neighbour_key('b', true), Some('a'));
        assert_eq!(neighbour_key('M', false), Some('N'));
    }

    #[test]
    fn alphabet_edges_are_not_fumbled_past() {
        assert_eq!(neighbour_key('a', true), None);
        assert_eq!(neighbour_key('z', false), None);
        assert_eq!(neighbour_key('A', true), None);
        assert_eq!(neighbour_key('Z', false), None);
    }

    #[test]
    fn non_letters_are_never_fumbled() {
        assert_eq!(neighbour_key('7', false), None);
        assert_eq!(neighbour_key('@', false), None);
        assert_eq!(neighbour_key(' ', true), None);
    }
}
