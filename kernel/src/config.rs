/*
 * This file is part of a small educational kernel core.
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General
 * Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Kernel command-line parsing: `-o mlfqs` selects MLFQ scheduling.
//!
//! The embedding kernel's boot code tokenizes the raw command line (quoting, escaping,
//! the kernel-vs-user-argument split) as an external collaborator; this module only
//! turns an already-tokenized argument stream into the typed [`SchedulerPolicy`] the
//! scheduler is constructed with.

use crate::thread::scheduler::SchedulerPolicy;

/// Scans `args` for a `-o mlfqs` option pair, returning the scheduling policy it selects.
///
/// Any other `-o <value>` pair, or no `-o` option at all, leaves the default priority
/// scheduler in place; this mirrors the original's "`-o mlfqs`: use multi-level feedback
/// queue scheduler" with every other kernel option out of scope for this crate.
pub fn parse_scheduler_policy<'a>(args: impl Iterator<Item = &'a str>) -> SchedulerPolicy {
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        if arg == "-o" && args.peek() == Some(&"mlfqs") {
            return SchedulerPolicy::Mlfq;
        }
    }
    SchedulerPolicy::Priority
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_priority_scheduling() {
        let policy = parse_scheduler_policy(["kernel.bin", "-q"].into_iter());
        assert_eq!(policy, SchedulerPolicy::Priority);
    }

    #[test]
    fn dash_o_mlfqs_selects_mlfq() {
        let policy = parse_scheduler_policy(["kernel.bin", "-o", "mlfqs"].into_iter());
        assert_eq!(policy, SchedulerPolicy::Mlfq);
    }

    #[test]
    fn unrelated_o_option_is_ignored() {
        let policy = parse_scheduler_policy(["-o", "something-else"].into_iter());
        assert_eq!(policy, SchedulerPolicy::Priority);
    }
}
