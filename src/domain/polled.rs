//! Polled grace-period cookies

use std::time::Duration;

use crate::domain::RcuState;
use crate::error::{RcuError, Result};
use crate::seq::{seq_done_exact, seq_snap};

const POLL_WAIT: Duration = Duration::from_millis(1);

impl RcuState {
    pub(crate) fn get_state(&self) -> u64 {
        seq_snap(self.gp_seq.load())
    }

    pub(crate) fn start_poll(&self, cpu: usize) -> Result<u64> {
        self.check_running()?;
        let rdp = self.online_rdp(cpu)?;
        let cookie = self.get_state();
        self.start_this_gp(rdp, cookie);
        Ok(cookie)
    }

    pub(crate) fn poll_state(&self, cookie: u64) -> bool {
        seq_done_exact(self.gp_seq.load(), cookie)
    }

    pub(crate) fn cond_synchronize(&self, cpu: usize, cookie: u64) -> Result<()> {
        if self.poll_state(cookie) {
            return Ok(());
        }
        let rdp = self.online_rdp(cpu)?;
        if rdp.in_read_section() {
            return Err(RcuError::ReadSideActive(cpu));
        }
        self.check_running()?;
        self.start_this_gp(rdp, cookie);

        while !self.poll_state(cookie) {
            if rdp.is_online() {
                self.report_quiescent_state(cpu)?;
                self.check_and_report(cpu)?;
            } else {
                self.check_running()?;
            }
            let mut done = self.gp_done.lock();
            if self.poll_state(cookie) {
                break;
            }
            if self.is_shutdown() {
                return Err(RcuError::ShutDown);
            }
            self.gp_done_cv.wait_for(&mut done, POLL_WAIT);
        }
        Ok(())
    }
}
