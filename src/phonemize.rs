//! Phonemization backends.
//!
//! The scheduler drives any [`PhonemizerBackend`]. The bundled implementation
//! (feature `espeak`) calls the `libespeak-ng` C API directly, driving the
//! same translation engine as `espeak-ng --ipa -q -v <language>` — one voice
//! per language, switched on the fly for multilingual corpora.
//!
//! ## Build requirements (feature `espeak` only)
//! | Platform             | Requirement                                              |
//! |----------------------|----------------------------------------------------------|
//! | Alpine / Linux       | `apk add espeak-ng-dev` / `apt install libespeak-ng-dev` |
//! | macOS (Homebrew)     | `brew install espeak-ng`                                 |
//!
//! Default builds carry no native dependency; tests and the batching half of
//! the pipeline run on mock backends.

use anyhow::Result;

/// Converts one chunk of text into a phoneme string.
///
/// Implementations are shared across scheduler workers, so they must be
/// `Send + Sync` and serialize internally if the underlying engine demands
/// it. A failed call is isolated to its chunk by the caller, never fatal to
/// the corpus run.
pub trait PhonemizerBackend: Send + Sync {
    /// Phonemize `text` under `language` (a phonemizer voice code such as
    /// `en-us`). Returns whitespace-separated phoneme symbols.
    fn phonemize(&self, text: &str, language: &str) -> Result<String>;
}

#[cfg(feature = "espeak")]
pub use espeak::{is_espeak_available, set_data_path, EspeakBackend};

// ─────────────────────────────────────────────────────────────────────────────
// espeak-ng FFI backend
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "espeak")]
mod espeak {
    use std::{
        ffi::{CStr, CString},
        os::raw::{c_char, c_int, c_void},
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use anyhow::{anyhow, Result};
    use once_cell::sync::OnceCell;

    use super::PhonemizerBackend;

    // Linking is handled by build.rs (ESPEAK_LIB_DIR override, pkg-config,
    // then a platform path walk).  No #[link] attribute here so the same
    // source compiles for every target without change.
    extern "C" {
        /// Set the directory that contains `espeak-ng-data/`.
        /// Pass `NULL` to use the library's compiled-in default.
        fn espeak_ng_InitializePath(path: *const c_char);

        /// Initialise the phoneme tables.  Must be called after InitializePath.
        /// Returns ENS_OK (0) on success.
        fn espeak_ng_Initialize(context: *mut c_void) -> c_int;

        /// Select the voice used for phonemisation.
        /// Returns EE_OK (0) on success.
        fn espeak_ng_SetVoiceByName(name: *const c_char) -> c_int;

        /// Translate text to phonemes.
        ///
        /// `textptr` is an in/out pointer: on entry it points to the start of
        /// the text; on return it has advanced past the translated clause, or
        /// been set to `NULL` when the entire text has been consumed.
        ///
        /// Returns a pointer to an internal buffer holding the phonemes for
        /// the current clause, or `NULL` for an empty clause.  Copy the string
        /// before making any further espeak-ng calls (the buffer is
        /// overwritten).
        fn espeak_TextToPhonemes(
            textptr: *mut *const c_void,
            textmode: c_int,
            phonememode: c_int,
        ) -> *const c_char;
    }

    /// `textmode` value: input is UTF-8.
    const CHARS_UTF8: c_int = 1;

    /// `phonememode` value: output IPA (bit 1 set).
    const PHONEMES_IPA: c_int = 0x02;

    /// Serialises every call into the espeak-ng library.
    /// espeak-ng uses global state and is not thread-safe.
    static LOCK: Mutex<()> = Mutex::new(());

    /// Cached result of the one-time initialisation.
    static INIT: OnceCell<std::result::Result<(), String>> = OnceCell::new();

    /// Optional runtime path to `espeak-ng-data/`.
    static DATA_PATH: OnceCell<PathBuf> = OnceCell::new();

    /// Voice most recently selected; switching voices is comparatively slow,
    /// so consecutive same-language calls skip it.
    static CURRENT_VOICE: Mutex<String> = Mutex::new(String::new());

    /// Set the path to the `espeak-ng-data` directory.
    ///
    /// Optional — if not called the library searches its compiled-in system
    /// path (e.g. `/usr/lib/x86_64-linux-gnu/espeak-ng-data` on Ubuntu, or
    /// the Homebrew prefix on macOS).  Has no effect once the library has
    /// been initialised by a first phonemize call.
    pub fn set_data_path(path: &Path) {
        let _ = DATA_PATH.set(path.to_path_buf());
    }

    /// Called exactly once (inside LOCK) to initialise the espeak-ng library.
    fn do_init() -> std::result::Result<(), String> {
        unsafe {
            let path_cstr: Option<CString> = match DATA_PATH.get() {
                Some(p) => Some(
                    CString::new(p.to_string_lossy().as_bytes())
                        .map_err(|_| "espeak data path contains a null byte".to_owned())?,
                ),
                None => None,
            };
            let path_ptr: *const c_char =
                path_cstr.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());

            espeak_ng_InitializePath(path_ptr);

            // ENS_OK = 0
            let status = espeak_ng_Initialize(std::ptr::null_mut());
            if status != 0 {
                return Err(format!(
                    "espeak_ng_Initialize failed (status {:#010x})",
                    status
                ));
            }
        }
        Ok(())
    }

    /// Select `language` as the active voice, skipping the call when it is
    /// already active.  Caller must hold LOCK.
    fn select_voice(language: &str) -> Result<()> {
        let mut current = CURRENT_VOICE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current == language {
            return Ok(());
        }
        let voice = CString::new(language)
            .map_err(|_| anyhow!("language code contains a null byte: {language:?}"))?;
        let rc = unsafe { espeak_ng_SetVoiceByName(voice.as_ptr()) };
        if rc != 0 {
            return Err(anyhow!(
                "espeak_ng_SetVoiceByName({language:?}) failed (rc {rc})"
            ));
        }
        *current = language.to_owned();
        Ok(())
    }

    /// Returns `true` if espeak-ng initialises successfully.
    pub fn is_espeak_available() -> bool {
        let _guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        INIT.get_or_init(do_init).is_ok()
    }

    /// Multilingual espeak-ng backend.
    ///
    /// Construction initialises the library eagerly so a missing data
    /// directory fails fast instead of failing on every chunk.
    pub struct EspeakBackend;

    impl EspeakBackend {
        pub fn new() -> Result<Self> {
            let _guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            INIT.get_or_init(do_init)
                .as_ref()
                .map_err(|e| anyhow!("espeak-ng: {e}"))?;
            Ok(Self)
        }
    }

    impl PhonemizerBackend for EspeakBackend {
        fn phonemize(&self, text: &str, language: &str) -> Result<String> {
            let _guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            INIT.get_or_init(do_init)
                .as_ref()
                .map_err(|e| anyhow!("espeak-ng: {e}"))?;
            select_voice(language)?;

            let text_c = CString::new(text)
                .map_err(|_| anyhow!("phonemize: text contains a null byte"))?;

            // `current` is the cursor that espeak_TextToPhonemes advances
            // through the input one clause at a time.
            let mut current: *const c_void = text_c.as_ptr() as *const c_void;
            let mut parts: Vec<String> = Vec::new();

            unsafe {
                while !current.is_null() {
                    let phonemes_ptr =
                        espeak_TextToPhonemes(&mut current, CHARS_UTF8, PHONEMES_IPA);

                    if phonemes_ptr.is_null() {
                        // Empty clause (e.g. leading whitespace) — keep looping.
                        continue;
                    }

                    // Copy out before the next call overwrites the buffer.
                    let clause = CStr::from_ptr(phonemes_ptr)
                        .to_str()
                        .map_err(|_| anyhow!("espeak-ng returned non-UTF-8 phonemes"))?
                        .trim()
                        .to_owned();

                    if !clause.is_empty() {
                        parts.push(clause);
                    }
                }
            }

            Ok(parts.join(" "))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_availability() {
            // If the crate linked (build succeeded), the library is present.
            assert!(is_espeak_available());
        }

        #[test]
        fn test_phonemize_english() {
            let backend = EspeakBackend::new().expect("espeak init failed");
            let ipa = backend.phonemize("Hello world", "en-us").expect("phonemize failed");
            assert!(!ipa.is_empty(), "IPA output should not be empty");
        }

        #[test]
        fn test_voice_switching() {
            let backend = EspeakBackend::new().expect("espeak init failed");
            let en = backend.phonemize("water", "en-us").expect("en-us failed");
            let hi = backend.phonemize("पानी", "hi").expect("hi failed");
            assert!(!en.is_empty());
            assert!(!hi.is_empty());
        }

        #[test]
        fn test_phonemize_empty() {
            let backend = EspeakBackend::new().expect("espeak init failed");
            let ipa = backend.phonemize("", "en-us").expect("phonemize failed");
            assert!(ipa.trim().is_empty(), "expected empty IPA, got: {ipa}");
        }
    }
}
