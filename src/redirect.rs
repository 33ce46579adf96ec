use http::header::LOCATION;
use http::{HeaderMap, StatusCode, Uri};

use crate::util::{non_blank, resolve_redirect_uri};

pub const MAX_REDIRECT_HOPS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectState {
    /// The original request has not produced a response yet.
    Dispatching,
    /// At least one redirect has been followed.
    Redirecting,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectStop {
    /// The request family does not follow redirects.
    FollowingDisabled,
    NotRedirect,
    MissingLocation,
    InvalidLocation,
    HopLimit,
}

impl RedirectStop {
    /// Whether the stop reflects a malformed redirect rather than a normal
    /// final response.
    pub const fn is_protocol_error(self) -> bool {
        matches!(self, Self::MissingLocation | Self::InvalidLocation)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectStep {
    Follow(Uri),
    Done(RedirectStop),
}

/// Bounded redirect loop over `301`/`302` responses.
///
/// Each call to [`RedirectResolver::on_response`] inspects one response. A redirect
/// with a usable `Location` is followed while fewer than
/// [`MAX_REDIRECT_HOPS`] hops have been taken; anything else ends the loop and
/// the caller returns that response unchanged.
#[derive(Clone, Debug)]
pub struct RedirectResolver {
    state: RedirectState,
    hops: u32,
    max_hops: u32,
    follow: bool,
}

impl RedirectResolver {
    pub fn new(follow: bool) -> Self {
        Self::with_max_hops(follow, MAX_REDIRECT_HOPS)
    }

    pub fn with_max_hops(follow: bool, max_hops: u32) -> Self {
        Self {
            state: RedirectState::Dispatching,
            hops: 0,
            max_hops,
            follow,
        }
    }

    pub fn state(&self) -> RedirectState {
        self.state
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    pub fn on_response(
        &mut self,
        current: &Uri,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> RedirectStep {
        let step = self.evaluate(current, status, headers);
        match &step {
            RedirectStep::Follow(_) => {
                self.hops += 1;
                self.state = RedirectState::Redirecting;
            }
            RedirectStep::Done(_) => self.state = RedirectState::Done,
        }
        step
    }

    fn evaluate(
        &self,
        current: &Uri,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> RedirectStep {
        if self.state == RedirectState::Done {
            return RedirectStep::Done(RedirectStop::HopLimit);
        }
        if !self.follow {
            return RedirectStep::Done(RedirectStop::FollowingDisabled);
        }
        if !is_followed_status(status) {
            return RedirectStep::Done(RedirectStop::NotRedirect);
        }

        let location = headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok());
        let Some(location) = non_blank(location) else {
            return RedirectStep::Done(RedirectStop::MissingLocation);
        };
        if self.hops >= self.max_hops {
            return RedirectStep::Done(RedirectStop::HopLimit);
        }
        match resolve_redirect_uri(current, location) {
            Some(target) => RedirectStep::Follow(target),
            None => RedirectStep::Done(RedirectStop::InvalidLocation),
        }
    }
}

fn is_followed_status(status: StatusCode) -> bool {
    matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
}
