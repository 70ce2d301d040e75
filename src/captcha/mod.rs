//! Captcha-solving orchestrator.
//!
//! Challenge flow: no challenge → up to 3 automatic vision-model attempts →
//! up to 3 manual attempts through the human channel → solved or failed.
//! A per-operation "solved in this browser session" flag short-circuits the
//! flow with a direct submission; it is cleared again if the portal
//! re-challenges.
//!
//! The human hand-off is a rendezvous: the challenge image goes out on one
//! channel and the orchestrator blocks for the typed answer (or None, which
//! means the user cancelled) on the other.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, Locator};
use crate::error::Result;
use crate::llm::VisionClient;

const AUTO_ATTEMPTS: u32 = 3;
const MANUAL_ATTEMPTS: u32 = 3;
const CAPTCHA_LEN: usize = 6;

/// Locators for one portal form guarded by a captcha.
#[derive(Debug, Clone)]
pub struct ChallengeForm {
    /// The challenge image element; absent means no challenge.
    pub image: Locator,
    /// Answer input box.
    pub input: Locator,
    /// Submit control.
    pub submit: Locator,
    /// Indicator that the submission went through.
    pub success: Locator,
    /// How long to wait for the success indicator.
    pub wait: Duration,
}

/// Human fallback: outbound challenge images, inbound typed answers.
/// A `None` answer is a cancellation.
pub struct HumanChannel {
    pub request_tx: mpsc::Sender<Vec<u8>>,
    pub answer_rx: mpsc::Receiver<Option<String>>,
}

/// Per-operation captcha orchestrator. Owns the "solved this browser
/// session" flag for the lifetime of one top-level operation. Without a
/// vision client the automatic attempts are skipped entirely.
pub struct CaptchaOrchestrator<'a> {
    vision: Option<&'a VisionClient>,
    human: Option<&'a mut HumanChannel>,
    solved_this_session: bool,
}

impl<'a> CaptchaOrchestrator<'a> {
    pub fn new(vision: Option<&'a VisionClient>, human: Option<&'a mut HumanChannel>) -> Self {
        Self {
            vision,
            human,
            solved_this_session: false,
        }
    }

    /// Solve the challenge guarding `form`, submitting the form in the
    /// process. Returns whether the submission succeeded; exhaustion and
    /// user cancellation both come back as `false`.
    pub async fn solve<D: BrowserDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        form: &ChallengeForm,
    ) -> Result<bool> {
        if self.solved_this_session {
            debug!("captcha already solved this session, submitting directly");
            driver.click(&form.submit).await?;
            if submission_succeeded(driver, form).await? {
                return Ok(true);
            }
            if driver.is_present(&form.image).await? {
                debug!("portal re-challenged, clearing solved flag");
                self.solved_this_session = false;
            } else {
                return Ok(false);
            }
        }

        if !driver.is_present(&form.image).await? {
            // No challenge control at all: trivially solved.
            driver.click(&form.submit).await?;
            self.solved_this_session = true;
            return Ok(true);
        }

        if let Some(vision) = self.vision {
            for attempt in 1..=AUTO_ATTEMPTS {
                let image = driver.element_image(&form.image).await?;
                let answer = match vision.read_captcha(&image).await {
                    Ok(response) => clean_answer(&response),
                    Err(e) => {
                        warn!("vision captcha attempt {} failed: {}", attempt, e);
                        None
                    }
                };
                let answer = match answer {
                    Some(a) => a,
                    None => continue,
                };

                if submit_answer(driver, form, &answer).await? {
                    info!("captcha solved automatically on attempt {}", attempt);
                    self.solved_this_session = true;
                    return Ok(true);
                }
            }
        }

        // The channel is moved out for the loop and handed back before every
        // return so later solve() calls keep the manual fallback.
        let human = match self.human.take() {
            Some(h) => h,
            None => {
                warn!("automatic captcha attempts exhausted, no human channel");
                return Ok(false);
            }
        };

        for attempt in 1..=MANUAL_ATTEMPTS {
            let image = match driver.element_image(&form.image).await {
                Ok(i) => i,
                Err(e) => {
                    self.human = Some(human);
                    return Err(e);
                }
            };
            if human.request_tx.send(image).await.is_err() {
                warn!("human captcha channel closed");
                self.human = Some(human);
                return Ok(false);
            }
            let answer = match human.answer_rx.recv().await.flatten() {
                Some(a) if !a.trim().is_empty() => a.trim().to_string(),
                // Null/empty answer is a user cancellation.
                _ => {
                    info!("manual captcha cancelled by user");
                    self.human = Some(human);
                    return Ok(false);
                }
            };

            match submit_answer(driver, form, &answer).await {
                Ok(true) => {
                    info!("captcha solved manually on attempt {}", attempt);
                    self.human = Some(human);
                    self.solved_this_session = true;
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => {
                    self.human = Some(human);
                    return Err(e);
                }
            }
        }

        warn!("captcha attempts exhausted");
        self.human = Some(human);
        Ok(false)
    }
}

async fn submit_answer<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    form: &ChallengeForm,
    answer: &str,
) -> Result<bool> {
    driver.type_text(&form.input, answer).await?;
    driver.click(&form.submit).await?;
    submission_succeeded(driver, form).await
}

/// A submission succeeded when the results indicator became visible, or the
/// challenge control disappeared.
async fn submission_succeeded<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    form: &ChallengeForm,
) -> Result<bool> {
    if driver.wait_for(&form.success, form.wait).await? {
        return Ok(true);
    }
    Ok(!driver.is_present(&form.image).await?)
}

/// Strip non-alphanumerics from a model response; accept only exactly six
/// remaining characters.
pub fn clean_answer(response: &str) -> Option<String> {
    let cleaned: String = response.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.len() == CAPTCHA_LEN {
        Some(cleaned)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn cleans_model_responses() {
        assert_eq!(clean_answer("aB3 x9Z"), Some("aB3x9Z".to_string()));
        assert_eq!(clean_answer("The code is: q2W8e1."), None);
        assert_eq!(clean_answer("q2W8e1"), Some("q2W8e1".to_string()));
        assert_eq!(clean_answer("12345"), None);
        assert_eq!(clean_answer("1234567"), None);
        assert_eq!(clean_answer(""), None);
    }

    const RIGHT_ANSWER: &str = "q2W8e1";

    /// Driver scripted for one challenge form: the portal accepts exactly
    /// one answer, and the challenge control disappears on success.
    struct ScriptedDriver {
        challenge_present: bool,
        submitted_ok: bool,
        typed: Vec<String>,
    }

    impl ScriptedDriver {
        fn with_challenge() -> Self {
            Self {
                challenge_present: true,
                submitted_ok: false,
                typed: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl BrowserDriver for ScriptedDriver {
        async fn navigate(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn page_title(&mut self) -> Result<String> {
            Ok("Tender Status".to_string())
        }
        async fn current_url(&mut self) -> Result<String> {
            Ok(String::new())
        }
        async fn is_present(&mut self, locator: &Locator) -> Result<bool> {
            Ok(match locator {
                Locator::Id(id) if id == "captchaImage" => self.challenge_present,
                Locator::Id(id) if id == "ok" => self.submitted_ok,
                _ => false,
            })
        }
        async fn click(&mut self, _locator: &Locator) -> Result<()> {
            if self.typed.last().map(String::as_str) == Some(RIGHT_ANSWER) {
                self.submitted_ok = true;
                self.challenge_present = false;
            }
            Ok(())
        }
        async fn type_text(&mut self, _locator: &Locator, text: &str) -> Result<()> {
            self.typed.push(text.to_string());
            Ok(())
        }
        async fn attribute(&mut self, _locator: &Locator, _name: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn element_image(&mut self, _locator: &Locator) -> Result<Vec<u8>> {
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
        async fn page_source(&mut self) -> Result<String> {
            Ok(String::new())
        }
        async fn wait_for(&mut self, locator: &Locator, _timeout: Duration) -> Result<bool> {
            self.is_present(locator).await
        }
        async fn cookies(&mut self) -> Result<Vec<(String, String)>> {
            Ok(Vec::new())
        }
        async fn anchor_hrefs(&mut self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn window_handles(&mut self) -> Result<Vec<String>> {
            Ok(vec!["main".to_string()])
        }
        async fn switch_to_window(&mut self, _handle: &str) -> Result<()> {
            Ok(())
        }
        async fn close_window(&mut self) -> Result<()> {
            Ok(())
        }
        async fn quit(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn test_form() -> ChallengeForm {
        ChallengeForm {
            image: Locator::id("captchaImage"),
            input: Locator::id("captchaText"),
            submit: Locator::id("Submit"),
            success: Locator::id("ok"),
            wait: Duration::from_millis(10),
        }
    }

    fn buffered_channel() -> (HumanChannel, mpsc::Receiver<Vec<u8>>, mpsc::Sender<Option<String>>) {
        let (request_tx, request_rx) = mpsc::channel(4);
        let (answer_tx, answer_rx) = mpsc::channel(4);
        (
            HumanChannel {
                request_tx,
                answer_rx,
            },
            request_rx,
            answer_tx,
        )
    }

    #[tokio::test]
    async fn manual_fallback_retries_until_accepted() {
        let (mut human, _request_rx, answer_tx) = buffered_channel();
        answer_tx.send(Some("zzzzzz".to_string())).await.unwrap();
        answer_tx.send(Some(RIGHT_ANSWER.to_string())).await.unwrap();

        let mut driver = ScriptedDriver::with_challenge();
        let mut orchestrator = CaptchaOrchestrator::new(None, Some(&mut human));
        assert!(orchestrator.solve(&mut driver, &test_form()).await.unwrap());
        assert_eq!(driver.typed, vec!["zzzzzz", RIGHT_ANSWER]);

        // Solved flag short-circuits the next form on the same session.
        assert!(orchestrator.solve(&mut driver, &test_form()).await.unwrap());
        assert_eq!(driver.typed.len(), 2);
    }

    #[tokio::test]
    async fn manual_cancellation_fails_one_item_and_keeps_the_channel() {
        let (mut human, _request_rx, answer_tx) = buffered_channel();
        answer_tx.send(None).await.unwrap();

        let mut driver = ScriptedDriver::with_challenge();
        let mut orchestrator = CaptchaOrchestrator::new(None, Some(&mut human));
        assert!(!orchestrator.solve(&mut driver, &test_form()).await.unwrap());

        // The channel survives a cancellation: the next item can still be
        // answered manually.
        answer_tx.send(Some(RIGHT_ANSWER.to_string())).await.unwrap();
        assert!(orchestrator.solve(&mut driver, &test_form()).await.unwrap());
    }

    #[tokio::test]
    async fn exhaustion_without_channel_is_failure() {
        let mut driver = ScriptedDriver::with_challenge();
        let mut orchestrator = CaptchaOrchestrator::new(None, None);
        assert!(!orchestrator.solve(&mut driver, &test_form()).await.unwrap());
    }
}
